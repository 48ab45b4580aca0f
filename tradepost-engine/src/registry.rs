//! Endpoint Pair Registry
//!
//! Owns every endpoint and enforces the one-to-one, symmetric linking rule:
//! two endpoints are linked iff each names the other. Anything else found in
//! the graph (one-sided links, links through a third endpoint, dangling
//! names) is normalized to "no link" before a new link is written.
//!
//! The registry is plain data behind `&mut self`; callers serialize access,
//! so no observer ever sees `a→b` without `b→a`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use tradepost_domain::{ContainerRef, Endpoint, EndpointName, LinkState, Location};

use crate::error::{EngineResult, RegistryError};

// =============================================================================
// Reports
// =============================================================================

/// A stale link that was cleared during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkCorrection {
    /// Endpoint whose link was cleared
    pub endpoint: EndpointName,
    /// What it used to point at
    pub previous: EndpointName,
}

impl fmt::Display for LinkCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} no longer links to {}", self.endpoint, self.previous)
    }
}

/// Outcome of `link`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub a: EndpointName,
    pub b: EndpointName,
    /// The pair was already properly linked before the call
    pub already_linked: bool,
    /// Corrections made, sorted by endpoint
    pub corrections: Vec<LinkCorrection>,
}

impl LinkReport {
    /// Every endpoint whose record changed (persist these together)
    pub fn changed(&self) -> Vec<EndpointName> {
        let mut changed = vec![self.a.clone(), self.b.clone()];
        for correction in &self.corrections {
            if !changed.contains(&correction.endpoint) {
                changed.push(correction.endpoint.clone());
            }
        }
        changed
    }
}

/// Outcome of `unlink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlinkReport {
    pub endpoint: EndpointName,
    /// What the endpoint pointed at, if anything
    pub previous: Option<EndpointName>,
    /// Other endpoints that named this one and were cleared
    pub cleared: Vec<EndpointName>,
}

impl UnlinkReport {
    pub fn changed(&self) -> Vec<EndpointName> {
        let mut changed = vec![self.endpoint.clone()];
        changed.extend(self.cleared.iter().cloned());
        changed
    }
}

// =============================================================================
// Registry
// =============================================================================

/// In-memory registry of endpoints, keyed case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<EndpointName, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records. Links are taken as stored; any
    /// inconsistency is normalized the next time one of them is linked.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut registry = Self::new();
        for endpoint in endpoints {
            if registry.endpoints.contains_key(&endpoint.name) {
                warn!(endpoint = %endpoint.name, "Duplicate endpoint record skipped");
                continue;
            }
            registry.endpoints.insert(endpoint.name.clone(), endpoint);
        }
        let inconsistent = registry.inconsistencies();
        if !inconsistent.is_empty() {
            warn!(count = inconsistent.len(), "Registry loaded with inconsistent links");
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, name: &EndpointName) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    /// Look up an endpoint or fail with `NotFound`
    pub fn require(&self, name: &EndpointName) -> EngineResult<&Endpoint> {
        self.endpoints
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All endpoints, ordered by name
    pub fn list(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Endpoints within `radius` of `origin` in the same world, nearest first
    pub fn find_within(&self, origin: &Location, radius: f64) -> Vec<(f64, &Endpoint)> {
        let mut found: Vec<(f64, &Endpoint)> = self
            .endpoints
            .values()
            .filter_map(|endpoint| {
                let distance = endpoint.location.as_ref()?.distance_to(origin)?;
                (distance <= radius).then_some((distance, endpoint))
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found
    }

    /// Link state as seen from `name`
    pub fn link_state(&self, name: &EndpointName) -> EngineResult<LinkState> {
        let endpoint = self.require(name)?;
        Ok(match &endpoint.linked {
            None => LinkState::Unlinked,
            Some(target) => match self.endpoints.get(target) {
                Some(partner) if partner.names(name) && target != name => {
                    LinkState::Linked(target.clone())
                },
                _ => LinkState::Inconsistent(target.clone()),
            },
        })
    }

    /// Properly linked partner, if any
    pub fn partner(&self, name: &EndpointName) -> Option<EndpointName> {
        match self.link_state(name) {
            Ok(LinkState::Linked(partner)) => Some(partner),
            _ => None,
        }
    }

    /// Endpoints whose link is not mutual, with their stale target
    pub fn inconsistencies(&self) -> Vec<(EndpointName, EndpointName)> {
        self.endpoints
            .keys()
            .filter_map(|name| match self.link_state(name) {
                Ok(LinkState::Inconsistent(target)) => Some((name.clone(), target)),
                _ => None,
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Register a new endpoint.
    pub fn create(
        &mut self,
        name: EndpointName,
        container: ContainerRef,
        location: Option<Location>,
        now: DateTime<Utc>,
    ) -> EngineResult<&Endpoint> {
        if self.endpoints.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        if let Some(owner) = self.endpoints.values().find(|e| e.container == container) {
            return Err(RegistryError::ContainerInUse {
                container,
                owner: owner.name.clone(),
            });
        }

        info!(endpoint = %name, %container, "Endpoint created");
        let endpoint = Endpoint::new(name.clone(), container, location, now);
        Ok(self.endpoints.entry(name).or_insert(endpoint))
    }

    /// Link `a` and `b`, normalizing any stale state that touches either.
    ///
    /// When the graph is ambiguous the two named endpoints always win: any
    /// third endpoint pointing at either of them is demoted to unlinked.
    pub fn link(&mut self, a: &EndpointName, b: &EndpointName) -> EngineResult<LinkReport> {
        self.require(a)?;
        self.require(b)?;
        if a == b {
            return Err(RegistryError::SelfLink(a.clone()));
        }

        let already_linked = self.link_state(a)? == LinkState::Linked(b.clone());
        let mut corrections = Vec::new();

        // Named endpoints pointing somewhere else
        for (x, other) in [(a, b), (b, a)] {
            if let Some(endpoint) = self.endpoints.get_mut(x) {
                match endpoint.linked.take() {
                    Some(previous) if &previous != other => {
                        corrections.push(LinkCorrection {
                            endpoint: x.clone(),
                            previous,
                        });
                    },
                    keep => endpoint.linked = keep,
                }
            }
        }

        // Third endpoints pointing at either named endpoint
        for (name, endpoint) in self.endpoints.iter_mut() {
            if name == a || name == b {
                continue;
            }
            if let Some(target) = endpoint.linked.as_ref() {
                if target == a || target == b {
                    corrections.push(LinkCorrection {
                        endpoint: name.clone(),
                        previous: target.clone(),
                    });
                    endpoint.linked = None;
                }
            }
        }

        if let Some(endpoint) = self.endpoints.get_mut(a) {
            endpoint.linked = Some(b.clone());
        }
        if let Some(endpoint) = self.endpoints.get_mut(b) {
            endpoint.linked = Some(a.clone());
        }

        corrections.sort_by(|x, y| x.endpoint.cmp(&y.endpoint));
        for correction in &corrections {
            warn!(%correction, "Stale endpoint link cleared");
        }
        if already_linked {
            debug!(%a, %b, "Endpoints already linked");
        } else {
            info!(%a, %b, corrections = corrections.len(), "Endpoints linked");
        }

        // Report in canonical order so link(a, b) and link(b, a) agree
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Ok(LinkReport {
            a: first.clone(),
            b: second.clone(),
            already_linked,
            corrections,
        })
    }

    /// Clear `name`'s link and every link that points at `name`.
    pub fn unlink(&mut self, name: &EndpointName) -> EngineResult<UnlinkReport> {
        let previous = self
            .endpoints
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
            .linked
            .take();

        let mut cleared = Vec::new();
        for (other, endpoint) in self.endpoints.iter_mut() {
            if other != name && endpoint.names(name) {
                endpoint.linked = None;
                cleared.push(other.clone());
            }
        }

        info!(endpoint = %name, previous = ?previous.as_ref().map(|p| p.to_string()), cleared = cleared.len(), "Endpoint unlinked");
        Ok(UnlinkReport {
            endpoint: name.clone(),
            previous,
            cleared,
        })
    }

    /// Remove an endpoint, clearing every link that involves it.
    ///
    /// Whether the endpoint may be deleted (no active trade) is the caller's
    /// decision; the registry only keeps the graph consistent.
    pub fn delete(&mut self, name: &EndpointName) -> EngineResult<(Endpoint, UnlinkReport)> {
        let report = self.unlink(name)?;
        let endpoint = self
            .endpoints
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        info!(endpoint = %name, "Endpoint deleted");
        Ok((endpoint, report))
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Item Transfer Engine
//!
//! Moves item stacks from a source snapshot into a destination inventory.
//! Pure: slots in, slots out. The caller owns the source container and is
//! responsible for clearing it and for disposing of the leftover.
//!
//! # Algorithm
//!
//! For each non-empty source slot, in slot order:
//! 1. Merge into existing destination stacks of the same kind with spare
//!    capacity, first-fit by destination slot order
//! 2. Place the remainder into empty destination slots, first-fit
//! 3. Whatever is still left goes to `leftover`
//!
//! `moveable = min(remaining, capacity)`; no stack ever exceeds its kind's
//! maximum.

use tradepost_domain::{tally, ItemStack, Slots};

/// Outcome of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Destination after the transfer
    pub inventory: Slots,
    /// Stacks that did not fit, in source order
    pub leftover: Vec<ItemStack>,
    /// Total items placed into the destination
    pub moved: u64,
}

impl TransferResult {
    pub fn is_complete(&self) -> bool {
        self.leftover.is_empty()
    }
}

/// Transfer stacks into `destination`.
///
/// `source` is either a container snapshot (`slots.iter().flatten()`) or
/// loose stacks such as a lost-and-found backlog.
pub fn transfer<'a>(
    source: impl IntoIterator<Item = &'a ItemStack>,
    mut destination: Slots,
) -> TransferResult {
    let mut leftover = Vec::new();
    let mut moved = 0u64;

    for stack in source {
        let mut remaining = stack.amount;

        // Merge into compatible stacks
        for slot in destination.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            if !slot.can_merge(stack) {
                continue;
            }
            let moveable = remaining.min(slot.space());
            slot.amount += moveable;
            remaining -= moveable;
            moved += u64::from(moveable);
        }

        // Fill empty slots
        for slot in destination.iter_mut() {
            if remaining == 0 {
                break;
            }
            if slot.is_some() {
                continue;
            }
            let moveable = remaining.min(stack.kind.max_stack);
            if moveable == 0 {
                break;
            }
            *slot = Some(ItemStack {
                kind: stack.kind.clone(),
                amount: moveable,
            });
            remaining -= moveable;
            moved += u64::from(moveable);
        }

        if remaining > 0 {
            leftover.push(ItemStack {
                kind: stack.kind.clone(),
                amount: remaining,
            });
        }
    }

    TransferResult {
        inventory: destination,
        leftover,
        moved,
    }
}

/// True when `before` and `after` hold the same multiset of items.
///
/// Slot layout and stack splitting are ignored; only per-kind totals count.
pub fn same_contents<'a, 'b>(
    before: impl IntoIterator<Item = &'a ItemStack>,
    after: impl IntoIterator<Item = &'b ItemStack>,
) -> bool {
    tally(before) == tally(after)
}

// =============================================================================
// Tests
// =============================================================================

pub mod keymaps;
pub mod pending;
pub mod shard;
pub mod slot_arena;

pub use keymaps::{KeyRecord, Keymaps, NO_EXPIRY};
pub use pending::{PendingGuard, PendingWrites};
pub use shard::{Digest, ShardSelector};
pub use slot_arena::{SlotArena, SlotId};

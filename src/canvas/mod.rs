//! Client-side collaboration engine: the replicated object store, local
//! undo/redo, presence, and the session that ties them to a room.

pub mod history;
pub mod object;
pub mod presence;
pub mod session;
pub mod store;

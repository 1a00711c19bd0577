use std::fmt;
use std::future::Future;

/// Identifier of one physical message store.
///
/// Displayed as `shard_{n}`, which is also how the stores are named in
/// deployment configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId(usize);

impl ShardId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard_{}", self.0)
    }
}

/// Routes a chat room id to the partition index holding that room's messages.
///
/// This is the single routing rule of the system: every component that picks
/// a store for a room must go through it, otherwise reads and writes diverge.
pub fn shard_index(room_id: i64, count: usize) -> usize {
    room_id.rem_euclid(count as i64) as usize
}

/// The set of partitioned message stores.
///
/// Shard 0 doubles as the primary store: rooms, memberships and user display
/// data live there regardless of how many message shards exist. Handing out
/// scoped `&T` borrows (instead of a thread-local "current shard") makes it
/// impossible for one operation's routing choice to leak into another.
pub struct Shards<T> {
    members: Vec<T>,
}

impl<T> Shards<T> {
    pub fn new(members: Vec<T>) -> Self {
        assert!(!members.is_empty(), "at least one shard is required");

        Self { members }
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn id_for(&self, room_id: i64) -> ShardId {
        ShardId(shard_index(room_id, self.members.len()))
    }

    pub fn get(&self, id: ShardId) -> &T {
        &self.members[id.index()]
    }

    /// The store holding the given room's messages.
    pub fn for_room(&self, room_id: i64) -> &T {
        self.get(self.id_for(room_id))
    }

    /// The primary store (shard 0). Used for every entity that is not
    /// partitioned. This is an explicit choice by the caller, never a
    /// fallback for a missing room id.
    pub fn primary(&self) -> &T {
        &self.members[0]
    }

    /// All shards with their ids, for the rare operations that must be issued
    /// against every partition (the report collaborator merges the results).
    pub fn iter(&self) -> impl Iterator<Item = (ShardId, &T)> {
        self.members
            .iter()
            .enumerate()
            .map(|(idx, member)| (ShardId(idx), member))
    }

    /// Runs one operation against the store resolved for `room_id`. The
    /// borrow ends when the operation returns, so the routing decision cannot
    /// outlive it.
    pub async fn with_room<'a, F, Fut, R>(&'a self, room_id: i64, f: F) -> R
    where
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = R> + 'a,
    {
        f(self.for_room(room_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn two_shards() -> Shards<&'static str> {
        Shards::new(vec!["shard_0", "shard_1"])
    }

    #[test]
    fn even_rooms_route_to_shard_0() {
        let shards = two_shards();

        assert_eq!(shards.id_for(4), ShardId(0));
        assert_eq!(shards.id_for(10), ShardId(0));
        assert_eq!(*shards.for_room(4), "shard_0");
    }

    #[test]
    fn odd_rooms_route_to_shard_1() {
        let shards = two_shards();

        assert_eq!(shards.id_for(7), ShardId(1));
        assert_eq!(*shards.for_room(7), "shard_1");
    }

    #[test]
    fn routing_is_deterministic() {
        let shards = two_shards();

        for room_id in 0..100 {
            let first = shards.id_for(room_id);
            for _ in 0..10 {
                assert_eq!(shards.id_for(room_id), first);
            }
        }
    }

    #[test]
    fn generalizes_past_two_shards() {
        let shards = Shards::new(vec![0, 1, 2]);

        assert_eq!(shards.id_for(7).index(), 1);
        assert_eq!(shards.id_for(9).index(), 0);
        assert_eq!(shards.id_for(11).index(), 2);
    }

    #[test]
    fn primary_is_shard_0() {
        let shards = two_shards();

        assert_eq!(*shards.primary(), "shard_0");
    }

    #[test]
    fn shard_id_display() {
        let shards = two_shards();

        assert_eq!(shards.id_for(7).to_string(), "shard_1");
        assert_eq!(shards.id_for(4).to_string(), "shard_0");
    }

    #[test]
    fn iter_visits_every_shard_once() {
        let shards = Shards::new(vec!["a", "b"]);

        let visited: Vec<_> = shards.iter().map(|(id, s)| (id.index(), *s)).collect();
        assert_eq!(visited, vec![(0, "a"), (1, "b")]);
    }

    #[tokio::test]
    async fn with_room_scopes_the_selection() {
        let shards = two_shards();

        let seen = shards.with_room(7, |shard| async move { *shard }).await;
        assert_eq!(seen, "shard_1");

        // A following operation with no room key selects the primary shard,
        // regardless of what ran before it.
        assert_eq!(*shards.primary(), "shard_0");
    }

    #[tokio::test]
    async fn concurrent_routing_does_not_interfere() {
        let shards = Arc::new(Shards::new(vec![0usize, 1usize]));

        let mut handles = Vec::new();
        for room_id in 0..32i64 {
            let shards = shards.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let shard = *shards.for_room(room_id);
                    assert_eq!(shard, shard_index(room_id, 2));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.expect("routing task panicked");
        }
    }
}

// Per-author sequence allocation.

use crate::models::Post;

/// Next sequence id for an outgoing post: one more than the number of the
/// viewer's own posts currently in the feed. The allocator is deliberately
/// stateless; canceling a post removes it from the feed and frees its number
/// for the next submission, so ids are not monotonic across the session.
pub fn next_sequence_id(posts: &[Post]) -> u64 {
    posts.iter().filter(|p| p.mine).count() as u64 + 1
}

//! Reply-tree reconstruction for `bridge.get_discussion`
//!
//! The discussion API answers with a flat map keyed `author/permlink` where
//! each post lists its replies as keys into the same map. This module turns
//! that into a nested tree rooted at the requested post.

use std::collections::{HashMap, HashSet};

use super::model::{Post, PostKey, RawPost};

/// Deepest reply level that is still expanded
pub const MAX_REPLY_DEPTH: usize = 64;

/// Flat discussion map as returned by the chain
pub type DiscussionMap = HashMap<String, RawPost>;

/// Build the reply tree for `root`.
///
/// Returns `None` when the root is absent from the map. Reply keys missing
/// from the map are dropped, a post reachable twice is only placed once,
/// and nodes deeper than [`MAX_REPLY_DEPTH`] are returned without replies.
pub fn resolve_reply_tree(map: &DiscussionMap, root: &PostKey) -> Option<Post> {
    let root_key = root.to_string();
    let raw = map.get(&root_key)?;
    let mut placed = HashSet::new();
    placed.insert(root_key);
    Some(resolve_node(map, raw, &mut placed, 0))
}

fn resolve_node(
    map: &DiscussionMap,
    raw: &RawPost,
    placed: &mut HashSet<String>,
    depth: usize,
) -> Post {
    if depth >= MAX_REPLY_DEPTH {
        return raw.to_post(Vec::new());
    }

    let mut replies = Vec::with_capacity(raw.replies.len());
    for key in &raw.replies {
        let Some(child) = map.get(key) else {
            continue;
        };
        if !placed.insert(key.clone()) {
            continue;
        }
        replies.push(resolve_node(map, child, placed, depth + 1));
    }

    raw.to_post(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(author: &str, permlink: &str, replies: &[&str]) -> RawPost {
        serde_json::from_value(json!({
            "author": author,
            "permlink": permlink,
            "title": "",
            "body": format!("body of {}", permlink),
            "replies": replies,
        }))
        .unwrap()
    }

    fn map_of(posts: Vec<RawPost>) -> DiscussionMap {
        posts
            .into_iter()
            .map(|p| (format!("{}/{}", p.author, p.permlink), p))
            .collect()
    }

    fn count_nodes(post: &Post) -> usize {
        1 + post.replies.iter().map(count_nodes).sum::<usize>()
    }

    #[test]
    fn test_nested_tree() {
        let map = map_of(vec![
            raw("alice", "root", &["bob/re-1", "carol/re-2"]),
            raw("bob", "re-1", &["alice/re-re-1"]),
            raw("carol", "re-2", &[]),
            raw("alice", "re-re-1", &[]),
        ]);

        let tree = resolve_reply_tree(&map, &PostKey::new("alice", "root")).unwrap();
        assert_eq!(tree.replies.len(), 2);
        assert_eq!(tree.replies[0].author, "bob");
        assert_eq!(tree.replies[0].replies.len(), 1);
        assert_eq!(tree.replies[0].replies[0].permlink, "re-re-1");
        assert!(tree.replies[1].replies.is_empty());
        assert_eq!(count_nodes(&tree), 4);
    }

    #[test]
    fn test_dangling_keys_are_dropped() {
        let map = map_of(vec![
            raw("alice", "root", &["bob/missing", "carol/re-2", "dave/gone"]),
            raw("carol", "re-2", &["erin/also-missing"]),
        ]);

        let tree = resolve_reply_tree(&map, &PostKey::new("alice", "root")).unwrap();
        assert_eq!(tree.replies.len(), 1);
        assert_eq!(tree.replies[0].author, "carol");
        assert!(tree.replies[0].replies.is_empty());
    }

    #[test]
    fn test_reply_counts_match_present_keys() {
        let map = map_of(vec![
            raw("a", "root", &["b/1", "c/2", "x/nope"]),
            raw("b", "1", &["d/3", "e/4", "y/nope"]),
            raw("c", "2", &[]),
            raw("d", "3", &[]),
            raw("e", "4", &["z/nope"]),
        ]);

        fn check(post: &Post, map: &DiscussionMap) {
            let source = &map[&post.key().to_string()];
            let present = source.replies.iter().filter(|k| map.contains_key(*k)).count();
            assert_eq!(post.replies.len(), present);
            for reply in &post.replies {
                check(reply, map);
            }
        }

        let tree = resolve_reply_tree(&map, &PostKey::new("a", "root")).unwrap();
        check(&tree, &map);
    }

    #[test]
    fn test_missing_root() {
        let map = map_of(vec![raw("alice", "root", &[])]);
        assert!(resolve_reply_tree(&map, &PostKey::new("bob", "root")).is_none());
    }

    #[test]
    fn test_cycles_are_not_followed_twice() {
        let map = map_of(vec![
            raw("a", "root", &["b/1"]),
            raw("b", "1", &["a/root", "c/2"]),
            raw("c", "2", &["b/1"]),
        ]);

        let tree = resolve_reply_tree(&map, &PostKey::new("a", "root")).unwrap();
        assert_eq!(count_nodes(&tree), 3);
        assert_eq!(tree.replies[0].replies.len(), 1);
        assert_eq!(tree.replies[0].replies[0].author, "c");
    }

    #[test]
    fn test_depth_is_bounded() {
        let chain_len = MAX_REPLY_DEPTH + 10;
        let mut posts = Vec::new();
        for i in 0..chain_len {
            let next = format!("u/{}", i + 1);
            let replies: Vec<&str> = if i + 1 < chain_len { vec![next.as_str()] } else { vec![] };
            posts.push(raw("u", &i.to_string(), &replies));
        }
        let map = map_of(posts);

        let tree = resolve_reply_tree(&map, &PostKey::new("u", "0")).unwrap();
        assert_eq!(count_nodes(&tree), MAX_REPLY_DEPTH + 1);
    }
}

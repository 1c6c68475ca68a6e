//! Cache key scheme.

use blossom_core::{EntityId, TopicListQuery};

pub const DETAIL_KEY_PREFIX: &str = "topic:detail:";
pub const LIST_KEY_PREFIX: &str = "topic:list:";
/// Glob matching every list page, used for broad invalidation.
pub const LIST_KEY_PATTERN: &str = "topic:list:*";

/// `topic:detail:{id}`
pub fn detail_key(id: EntityId) -> String {
    format!("{}{}", DETAIL_KEY_PREFIX, id)
}

/// `topic:list:page:{p}:size:{s}:sort:{sort}:category:{c}`
///
/// Every query parameter participates, so two queries share an entry only
/// when they would return the same page. A missing category renders empty;
/// a present one is escaped with [`escape_segment`].
pub fn list_key(query: &TopicListQuery) -> String {
    format!(
        "{}page:{}:size:{}:sort:{}:category:{}",
        LIST_KEY_PREFIX,
        query.page,
        query.page_size,
        query.sort.as_str(),
        escape_segment(query.category.as_deref().unwrap_or(""))
    )
}

/// Percent-encode the key separator, glob metacharacters and `%` itself,
/// so a free-form value can neither forge another segment nor act as a
/// pattern during SCAN.
pub fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | ':' | '*' | '?' | '[' | ']' | '\\' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blossom_core::TopicSort;

    #[test]
    fn test_detail_key() {
        assert_eq!(detail_key(42), "topic:detail:42");
    }

    #[test]
    fn test_list_key_includes_every_parameter() {
        let q = TopicListQuery::new(2, 20, TopicSort::New, Some("rust".to_string()));
        assert_eq!(
            list_key(&q),
            "topic:list:page:2:size:20:sort:new:category:rust"
        );

        let default = TopicListQuery::default();
        assert_eq!(
            list_key(&default),
            "topic:list:page:1:size:10:sort:hot:category:"
        );
        assert!(list_key(&default).starts_with(LIST_KEY_PREFIX));
    }

    #[test]
    fn test_distinct_queries_get_distinct_keys() {
        let a = TopicListQuery::new(1, 10, TopicSort::Hot, None);
        let b = TopicListQuery::new(1, 10, TopicSort::Like, None);
        let c = TopicListQuery::new(1, 10, TopicSort::Hot, Some("go".to_string()));
        assert_ne!(list_key(&a), list_key(&b));
        assert_ne!(list_key(&a), list_key(&c));
    }

    #[test]
    fn test_category_cannot_forge_segments() {
        let forged = TopicListQuery::new(1, 10, TopicSort::Hot, Some("a:b".to_string()));
        let key = list_key(&forged);
        assert_eq!(key, "topic:list:page:1:size:10:sort:hot:category:a%3Ab");
        assert_eq!(escape_segment("*[?]%\\"), "%2A%5B%3F%5D%25%5C");
        assert_eq!(escape_segment("tech"), "tech");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn sort() -> impl Strategy<Value = TopicSort> {
            prop_oneof![
                Just(TopicSort::Hot),
                Just(TopicSort::New),
                Just(TopicSort::Like)
            ]
        }

        fn query() -> impl Strategy<Value = TopicListQuery> {
            (
                1i64..50,
                1i64..=100,
                sort(),
                proptest::option::of("[a-z:*?%\\[\\]]{1,8}"),
            )
                .prop_map(|(p, s, sort, c)| TopicListQuery::new(p, s, sort, c))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn prop_list_key_is_injective(a in query(), b in query()) {
                prop_assert_eq!(a == b, list_key(&a) == list_key(&b));
            }

            #[test]
            fn prop_list_keys_match_invalidation_pattern(q in query()) {
                let prefix = LIST_KEY_PATTERN.trim_end_matches('*');
                prop_assert!(list_key(&q).starts_with(prefix));
            }
        }
    }
}

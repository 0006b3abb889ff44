//! Property-based tests for SQL rewriting and escaping
//!
//! These tests verify, over generated inputs, that:
//! - The delete rewrite touches exactly the bare `DELETE FROM <table>` form
//! - LIKE escaping neutralizes every wildcard and escape character
//! - Credential masking never leaks the username or password
//! - Statement normalization is idempotent
//! - Index grouping preserves first-seen order without duplicates

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use dbport::core::db::schema::{group_indexes, IndexRow};
    use dbport::core::db::{mask_credentials, Connection, EscapeLike, QueryTemplate, SqliteConnector};
    use dbport::DatabaseConfig;

    // Test infrastructure

    fn connection(delete_hack: bool) -> Connection {
        let config = DatabaseConfig {
            dsn: Some("sqlite::memory:".to_string()),
                delete_hack,
            ..DatabaseConfig::default()
        };
        Connection::new(config, Arc::new(SqliteConnector))
    }

    fn arb_table_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_][a-z0-9_]{0,15}".prop_map(|s: String| s),
            "[a-z_][a-z0-9_]{0,15}".prop_map(|s: String| format!("`{}`", s)),
            ("[a-z]{1,8}", "[a-z]{1,8}").prop_map(|(db, t)| format!("{}.{}", db, t)),
        ]
    }

    fn arb_whitespace() -> impl Strategy<Value = String> {
        "[ \t\n]{0,3}".prop_map(|s: String| s)
    }

    fn arb_index_row() -> impl Strategy<Value = IndexRow> {
        (
            prop_oneof![
                Just("PRIMARY"),
                Just("idx_a"),
                Just("idx_b"),
                Just("uniq_c")
            ],
            prop_oneof![Just("id"), Just("a"), Just("b"), Just("c")],
            any::<bool>(),
            prop_oneof![Just("BTREE"), Just("FULLTEXT"), Just("SPATIAL")],
        )
            .prop_map(|(key, column, non_unique, kind)| IndexRow {
                key_name: key.to_string(),
                column_name: column.to_string(),
                non_unique,
                index_type: kind.to_string(),
            })
    }

    proptest! {
        #[test]
        fn prop_bare_delete_is_rewritten(
            table in arb_table_name(),
            lead in arb_whitespace(),
            trail in arb_whitespace(),
            upper in any::<bool>(),
        ) {
            let keyword = if upper { "DELETE FROM" } else { "delete from" };
            let sql = format!("{}{} {}{}", lead, keyword, table, trail);
            let conn = connection(true);
            prop_assert_eq!(conn.prep_query(&sql), format!("{} {} WHERE 1=1", keyword, table));
        }

        #[test]
        fn prop_filtered_delete_is_untouched(
            table in arb_table_name(),
            column in "[a-z]{1,8}",
            value in 0i64..1000,
        ) {
            let sql = format!("DELETE FROM {} WHERE {} = {}", table, column, value);
            let conn = connection(true);
            prop_assert_eq!(conn.prep_query(&sql), sql);
        }

        #[test]
        fn prop_delete_hack_disabled(table in arb_table_name()) {
            let sql = format!("DELETE FROM {}", table);
            let conn = connection(false);
            prop_assert_eq!(conn.prep_query(&sql), sql);
        }

        #[test]
        fn prop_like_escaping_neutralizes_wildcards(input in "[a-z0-9 %_!]{0,24}") {
            let escaped = input.as_str().escape_like('!');

            // Every special character is preceded by exactly one backslash
            let chars: Vec<char> = escaped.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                if matches!(c, '%' | '_' | '!') {
                    prop_assert!(i > 0 && chars[i - 1] == '\\');
                }
            }

            let unescaped = escaped.replace("\\%", "%").replace("\\_", "_").replace("\\!", "!");
            prop_assert_eq!(unescaped, input);
        }

        #[test]
        fn prop_like_escaping_maps_over_lists(items in prop::collection::vec("[a-z%_]{0,8}", 0..6)) {
            let escaped = items.escape_like('!');
            prop_assert_eq!(escaped.len(), items.len());
            for (original, escaped) in items.iter().zip(escaped.iter()) {
                prop_assert_eq!(escaped, &original.escape_like('!'));
            }
        }

        #[test]
        fn prop_masking_hides_credentials(
            username in "[a-zA-Z0-9]{1,12}",
            password in "[a-zA-Z0-9]{1,12}",
            noise in "[a-zA-Z0-9 ]{0,20}",
        ) {
            let message = format!(
                "SQLSTATE[HY000] [1045] Access denied for user '{}'@'10.0.0.1' (using password: {}) {}",
                username, password, noise
            );
            let masked = mask_credentials(&message, &username, &password);
            prop_assert!(!masked.contains(&username));
            prop_assert!(!masked.contains(&password));
        }

        #[test]
        fn prop_masking_overlapping_credentials(
            username in "[a-z]{1,8}",
            suffix in "[0-9]{1,6}",
            password_first in any::<bool>(),
        ) {
            let password = format!("{}{}", username, suffix);
            let message = format!(
                "Access denied for user '{}' (using password: {})",
                username, password
            );
            let masked = if password_first {
                mask_credentials(&message, &password, &username)
            } else {
                mask_credentials(&message, &username, &password)
            };
            prop_assert!(!masked.contains(&username));
            prop_assert!(!masked.contains(&suffix));
        }

        #[test]
        fn prop_masking_without_credentials_is_identity(message in "[a-zA-Z0-9 ]{0,40}") {
            prop_assert_eq!(mask_credentials(&message, "", ""), message);
        }

        #[test]
        fn prop_normalization_is_idempotent(
            body in "[a-zA-Z0-9 ,*=]{1,40}",
            terminators in "[; \n]{0,5}",
        ) {
            let sql = format!("SELECT {} FROM {{pre}}users{}", body, terminators);
            let once = QueryTemplate::new(&sql, "app_", "{pre}");
            let twice = QueryTemplate::new(once.normalized(), "app_", "{pre}");
            prop_assert_eq!(once.normalized(), twice.normalized());
            prop_assert!(!once.normalized().ends_with(';'));
            prop_assert!(once.normalized().ends_with("app_users"));
            prop_assert_eq!(once.original(), sql.as_str());
        }

        #[test]
        fn prop_index_grouping_preserves_first_seen_order(rows in prop::collection::vec(arb_index_row(), 0..30)) {
            let grouped = group_indexes(rows.clone());

            let mut expected_order: Vec<String> = Vec::new();
            let mut expected_fields: HashMap<String, Vec<String>> = HashMap::new();
            for row in &rows {
                if !expected_order.contains(&row.key_name) {
                    expected_order.push(row.key_name.clone());
                }
                let fields = expected_fields.entry(row.key_name.clone()).or_default();
                if !fields.contains(&row.column_name) {
                    fields.push(row.column_name.clone());
                }
            }

            let names: Vec<String> = grouped.iter().map(|i| i.name.clone()).collect();
            prop_assert_eq!(&names, &expected_order);

            for index in &grouped {
                let unique: HashSet<&String> = index.fields.iter().collect();
                prop_assert_eq!(unique.len(), index.fields.len());
                prop_assert_eq!(&index.fields, &expected_fields[&index.name]);
            }
        }
    }
}

use sqlx::{Postgres, QueryBuilder};

use super::{Attribute, FilterCriteria};

/// Append `criteria` to a statement that already has a `WHERE` clause.
///
/// Column names come from [`Attribute`]; every value (and every metadata
/// key) is sent as a bind parameter.
pub fn push_predicate(builder: &mut QueryBuilder<'_, Postgres>, criteria: &FilterCriteria) {
    for (attribute, expected) in criteria.iter() {
        match attribute {
            Attribute::Value => {
                builder.push(" AND value = ");
                builder.push_bind(expected.to_string());
            }
            Attribute::Arch => {
                builder.push(" AND arch = ");
                builder.push_bind(expected.to_string());
            }
            Attribute::Metadata(key) => {
                builder.push(" AND metadata ->> ");
                builder.push_bind(key.clone());
                builder.push(" = ");
                builder.push_bind(expected.to_string());
            }
        }
    }
}

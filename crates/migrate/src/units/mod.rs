//! Migration units shipped with the application schema

pub mod m1763613529725_add_events;
pub mod m1763613529726_add_allow_subscribe_to_shared_link;

use crate::error::MigrateResult;
use crate::migration::MigrationSet;

/// Objects owned by the base schema that these units build on
pub const EXTERNAL_TABLES: &[&str] = &["user", "asset", "album", "shared_link"];

/// Functions owned by the base schema or its extensions
pub const EXTERNAL_FUNCTIONS: &[&str] = &["uuid_generate_v4", "immich_uuid_v7", "updated_at"];

/// All built-in units in version order
pub fn builtin() -> MigrateResult<MigrationSet> {
    MigrationSet::new(vec![
        m1763613529725_add_events::unit()?,
        m1763613529726_add_allow_subscribe_to_shared_link::unit()?,
    ])
}

//! Subscription capability flag on shared links

use crate::error::MigrateResult;
use crate::migration::MigrationUnit;

pub const VERSION: &str = "1763613529726-AddAllowSubscribeToSharedLink";

pub fn unit() -> MigrateResult<MigrationUnit> {
    MigrationUnit::build(
        VERSION,
        "Add allowSubscribe to shared link",
        |schema| {
            schema.add_column("shared_link", "allowSubscribe", "boolean", |column| {
                column.not_null().default("false");
            });
        },
        |schema| {
            schema.drop_column("shared_link", "allowSubscribe");
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_not_null_flag_defaulting_to_false() {
        let unit = unit().unwrap();
        assert_eq!(
            unit.up[0].sql,
            "ALTER TABLE \"shared_link\" ADD COLUMN \"allowSubscribe\" boolean NOT NULL DEFAULT false;"
        );
        assert_eq!(
            unit.down[0].sql,
            "ALTER TABLE \"shared_link\" DROP COLUMN IF EXISTS \"allowSubscribe\";"
        );
        assert!(unit.destructive_down());
    }
}

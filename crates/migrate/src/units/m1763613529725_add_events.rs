//! Event entity, delete auditing and the album back-reference

use crate::error::MigrateResult;
use crate::migration::MigrationUnit;
use crate::schema_builder::{ForeignKey, ReferentialAction, SchemaBuilder};

pub const VERSION: &str = "1763613529725-Add-Events";

const EVENT_DELETE_AUDIT_BODY: &str = r#"
BEGIN
  INSERT INTO events_audit ("eventId", "userId")
  SELECT "id", "ownerId"
  FROM old;
  RETURN NULL;
END
"#;

// Cascaded event deletes run at trigger depth > 0 and skip the event trigger,
// so the owner's events are recorded here before the cascade removes them.
const USER_DELETE_EVENT_AUDIT_BODY: &str = r#"
BEGIN
  INSERT INTO events_audit ("eventId", "userId")
  SELECT "id", "ownerId"
  FROM "event"
  WHERE "ownerId" = OLD."id";
  RETURN OLD;
END
"#;

pub fn unit() -> MigrateResult<MigrationUnit> {
    MigrationUnit::build(VERSION, "Add events", up, down)
}

fn up(schema: &mut SchemaBuilder) {
    schema.create_table("event", |table| {
        table.column("id", "uuid").not_null().default_call("uuid_generate_v4");
        table.column("ownerId", "uuid").not_null();
        table
            .column("eventName", "character varying")
            .not_null()
            .default("'Untitled Event'");
        table
            .column("createdAt", "timestamp with time zone")
            .not_null()
            .default("now()");
        table.column("eventThumbnailAssetId", "uuid");
        table
            .column("updatedAt", "timestamp with time zone")
            .not_null()
            .default("now()");
        table.column("description", "text").not_null().default("''");
        table.column("deletedAt", "timestamp with time zone");
        table
            .column("updateId", "uuid")
            .not_null()
            .default_call("immich_uuid_v7");
        table.primary_key("event_pkey", &["id"]);
        table.foreign_key(
            "event_ownerId_fkey",
            ForeignKey::new("ownerId", "user", "id")
                .on_update(ReferentialAction::Cascade)
                .on_delete(ReferentialAction::Cascade),
        );
        table.foreign_key(
            "event_eventThumbnailAssetId_fkey",
            ForeignKey::new("eventThumbnailAssetId", "asset", "id")
                .on_update(ReferentialAction::Cascade)
                .on_delete(ReferentialAction::SetNull),
        );
    });

    schema.comment_on_column("event", "eventThumbnailAssetId", "Asset ID to be used as thumbnail");

    schema
        .create_index("event", &["ownerId"], Some("event_ownerId_idx"))
        .create_index("event", &["eventThumbnailAssetId"], Some("event_eventThumbnailAssetId_idx"))
        .create_index("event", &["updateId"], Some("event_updateId_idx"));

    // Audit rows outlive both the event and its owner, so no foreign keys here.
    schema.create_table("events_audit", |table| {
        table.column("id", "uuid").not_null().default_call("uuid_generate_v4");
        table.column("eventId", "uuid").not_null();
        table.column("userId", "uuid").not_null();
        table
            .column("deletedAt", "timestamp with time zone")
            .not_null()
            .default("clock_timestamp()");
        table.primary_key("events_audit_pkey", &["id"]);
    });

    schema
        .create_index("events_audit", &["userId"], Some("IDX_events_audit_user_id"))
        .create_index("events_audit", &["eventId"], Some("IDX_events_audit_event_id"))
        .create_index("events_audit", &["deletedAt"], Some("IDX_events_audit_deleted_at"));

    schema.create_function("public.event_delete_audit", |function| {
        function.uses_table("events_audit").body(EVENT_DELETE_AUDIT_BODY);
    });

    schema.create_trigger("event_delete_audit", "event", |trigger| {
        trigger
            .after()
            .on_delete()
            .referencing_old_table("old")
            .for_each_statement()
            .when("pg_trigger_depth() = 0")
            .execute_function("public.event_delete_audit");
    });

    schema.create_function("public.user_delete_event_audit", |function| {
        function
            .uses_table("events_audit")
            .uses_table("event")
            .body(USER_DELETE_EVENT_AUDIT_BODY);
    });

    schema.create_trigger("user_delete_event_audit", "user", |trigger| {
        trigger
            .before()
            .on_delete()
            .for_each_row()
            .when("pg_trigger_depth() = 0")
            .execute_function("public.user_delete_event_audit");
    });

    // updated_at() is owned by the base schema
    schema.create_trigger("events_updatedAt", "event", |trigger| {
        trigger
            .before()
            .on_update()
            .for_each_row()
            .execute_function("updated_at");
    });

    // Nullable so ON DELETE SET NULL is valid for existing albums
    schema.add_column("album", "eventId", "uuid", |_| {});
    schema.add_foreign_key(
        "album",
        "album_eventId_fkey",
        ForeignKey::new("eventId", "event", "id")
            .on_update(ReferentialAction::Cascade)
            .on_delete(ReferentialAction::SetNull),
    );
    schema.create_index("album", &["eventId"], Some("album_eventId_idx"));
}

fn down(schema: &mut SchemaBuilder) {
    schema
        .drop_index("album", "album_eventId_idx")
        .drop_constraint("album", "album_eventId_fkey")
        .drop_column("album", "eventId");

    schema
        .drop_trigger("event", "events_updatedAt")
        .drop_trigger("user", "user_delete_event_audit")
        .drop_trigger("event", "event_delete_audit")
        .drop_function("public.user_delete_event_audit")
        .drop_function("public.event_delete_audit");

    // Discards the audit history; see DESIGN.md
    schema.drop_table("events_audit");
    schema.drop_table("event");
}

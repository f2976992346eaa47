diesel::table! {
    approval_entity (id) {
        id -> Uuid,
        request_id -> Nullable<Uuid>,
        entity_geid -> Nullable<Text>,
        entity_type -> Nullable<Text>,
        review_status -> Nullable<Text>,
        parent_geid -> Nullable<Text>,
        copy_status -> Nullable<Text>,
        name -> Text,
    }
}

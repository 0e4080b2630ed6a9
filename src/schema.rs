diesel::table! {
    board (id) {
        id -> Uuid,
        slug -> Text,
        name -> Text,
        local_rule -> Text,
        default_author_name -> Text,
        max_content_length -> Int4,
        order_index -> Int4,
        is_active -> Bool,
        is_default -> Bool,
    }
}

diesel::table! {
    thread (id) {
        id -> Uuid,
        epoch_id -> Int8,
        title -> Text,
        posted_at -> Timestamptz,
        updated_at -> Timestamptz,
        board_id -> Uuid,
    }
}

diesel::table! {
    response (id) {
        id -> Uuid,
        thread_id -> Uuid,
        response_number -> Int4,
        author_name -> Text,
        trip -> Nullable<Text>,
        mail -> Text,
        content -> Text,
        hash_id -> Text,
        posted_at -> Timestamptz,
    }
}

diesel::joinable!(response -> thread (thread_id));
diesel::joinable!(thread -> board (board_id));

diesel::allow_tables_to_appear_in_same_query!(board, response, thread,);

diesel::table! {
    posts (id) {
        id -> BigInt,
        fb_post_id -> Text,
        status -> Text,
        author_id -> Nullable<Text>,
        author_name -> Nullable<Text>,
        message -> Nullable<Text>,
        permalink -> Nullable<Text>,
        created_at -> Nullable<Timestamptz>,
        received_at -> Timestamptz,
        discord_msg_id -> Nullable<Text>,
        delivered_at -> Nullable<Timestamptz>,
        retry_count -> Integer,
        last_error -> Nullable<Text>,
    }
}

diesel::table! {
    post_events (id) {
        id -> BigInt,
        fb_post_id -> Text,
        event -> Text,
        details -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    delivery_logs (id) {
        id -> BigInt,
        fb_post_id -> Text,
        success -> Bool,
        discord_msg_id -> Nullable<Text>,
        error_message -> Nullable<Text>,
        latency_ms -> Integer,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    relay_jobs (id) {
        id -> BigInt,
        queue -> Text,
        payload -> Jsonb,
        singleton_key -> Nullable<Text>,
        status -> Text,
        retry_count -> Integer,
        max_retries -> Integer,
        scheduled_for -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(posts, post_events, delivery_logs, relay_jobs);

// Diesel schema for the PostgreSQL backend, kept in sync with
// `PgStorage::init_schema`.

diesel::table! {
    sites (url, filter, content_type) {
        url -> Text,
        filter -> Text,
        content_type -> Text,
        last_updated -> Timestamptz,
        last_checked -> Timestamptz,
        content -> Bytea,
        diff -> Text,
        checksum -> Text,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Int8,
        url -> Text,
        filter -> Text,
        content_type -> Text,
        use_chrome -> Bool,
    }
}

diesel::table! {
    subscribers (email) {
        email -> Text,
        subscription_limit -> Int8,
    }
}

diesel::table! {
    subscriber_subscriptions (subscriber_email, subscription_id) {
        subscriber_email -> Text,
        subscription_id -> Int8,
        interval -> Interval,
    }
}

diesel::joinable!(subscriber_subscriptions -> subscribers (subscriber_email));
diesel::joinable!(subscriber_subscriptions -> subscriptions (subscription_id));

diesel::allow_tables_to_appear_in_same_query!(
    sites,
    subscribers,
    subscriber_subscriptions,
    subscriptions,
);

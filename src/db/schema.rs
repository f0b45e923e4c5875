table! {
    stats (id) {
        id -> Int4,
        pool_id -> Text,
        fee -> Nullable<Float8>,
        paid -> Nullable<Float8>,
        blocks -> Nullable<Int8>,
        last_block_found -> Nullable<Timestamp>,
        pool_hashrate -> Float8,
        network_hashrate -> Float8,
        network_difficulty -> Float8,
        block_height -> Nullable<Int8>,
        connected_miners -> Nullable<Int8>,
        shares_per_second -> Nullable<Float8>,
        minimum_payment -> Nullable<Float8>,
        payout_scheme -> Nullable<Text>,
        pool_effort -> Float8,
        pool_ttf -> Float8,
        insert_time_stamp -> Timestamp,
    }
}

table! {
    block (block_height) {
        block_height -> Int8,
        pool_id -> Text,
        miner -> Text,
        miner_short -> Text,
        time_found -> Timestamp,
        effort -> Float8,
        network_difficulty -> Float8,
        reward -> Float8,
        confirmation_progress -> Float8,
        status -> Int4,
        hash -> Nullable<Text>,
        info_link -> Nullable<Text>,
    }
}

table! {
    payment (id) {
        id -> Int4,
        pool_id -> Text,
        miner -> Text,
        pending_shares -> Float8,
        pending_balance -> Float8,
        total_paid -> Float8,
        today_paid -> Float8,
        last_payment -> Text,
        last_payment_link -> Text,
        payout_schema -> Text,
        price -> Float8,
        price_btc -> Float8,
        created_at -> Timestamp,
    }
}

table! {
    live_worker (id) {
        id -> Int4,
        miner -> Text,
        worker -> Text,
        hashrate -> Float8,
        shares_per_second -> Float8,
        effort -> Float8,
        ttf -> Float8,
        last_block_found -> Nullable<Timestamp>,
        created -> Timestamp,
        inserted_at -> Timestamp,
    }
}

table! {
    performance (id) {
        id -> Int4,
        miner -> Text,
        worker -> Text,
        hashrate -> Float8,
        shares_per_second -> Float8,
        effort -> Float8,
        ttf -> Float8,
        created -> Timestamp,
        inserted_at -> Timestamp,
    }
}

allow_tables_to_appear_in_same_query!(
    stats,
    block,
    payment,
    live_worker,
    performance,
);

pub mod http_client;
pub mod ingest_meta;
pub mod pacer;
pub mod rate_limiter;
pub mod supabase;

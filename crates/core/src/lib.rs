pub mod cache {
    pub mod error;
    pub mod port;
}

pub mod candle {
    pub mod entity;
    pub mod error;
    pub mod merge;
}

pub mod common;
pub mod config;

pub mod ingest {
    pub mod error;
    pub mod port;
}

pub mod retry;

pub mod store {
    pub mod entity;
    pub mod error;
    pub mod port;
}

pub mod telemetry {
    pub mod port;
}

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub mod clients {
    pub mod event_stream;
    pub mod firebase;
    pub mod openai;
    pub mod s3;
}

pub mod models {
    pub mod diary;
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod diary;
    pub mod memory;
    pub mod store;
    pub mod user;
}

pub mod services {
    pub mod auth;
    pub mod diaries;
    pub mod feedback;
    pub mod generation;
    pub mod identity;
    pub mod session;
    pub mod uploads;
}

pub mod handlers {
    pub mod auth;
    pub mod diaries;
    pub mod feedback;
    pub mod health;
    pub mod json;
    pub mod uploads;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
}

pub mod validation {
    pub mod auth;
    pub mod diary;
}

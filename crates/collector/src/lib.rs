pub mod aggregator;
pub mod cache;
pub mod config;
pub mod logger;
pub mod normalizer;
pub mod pipeline;
pub mod record;
pub mod returns;
pub mod scheduler;
pub mod server;
pub mod status;
pub mod writer;

/// 라이브러리 로드 시 .env 자동 로드
#[ctor::ctor]
fn init_dotenv() {
    dotenv::dotenv().ok();
}

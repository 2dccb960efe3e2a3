use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// stdout + 일 단위 로테이션 파일 로그 초기화
/// 반환된 guard는 프로세스 종료 시까지 유지해야 버퍼가 flush된다.
pub fn init_tracing(log_dir: &str) -> Vec<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_appender = tracing_appender::rolling::daily(log_dir, "collector.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(stdout_writer).with_target(false))
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true),
        );

    if let Err(e) = registry.try_init() {
        eprintln!("tracing already initialized: {}", e);
    }

    vec![stdout_guard, file_guard]
}

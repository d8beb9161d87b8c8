/// Installs the process-wide subscriber; the iOS build also appends to
/// `<data_dir>/kasookoo.log`. Later calls are no-ops.
pub fn init_logging(#[allow(unused)] data_dir: &str) {
    #[cfg(any(target_os = "ios", target_os = "android"))]
    const MOBILE_FILTER: &str = "kasookoo_core=debug,reqwest=info,info";

    #[cfg(target_os = "ios")]
    {
        use tracing_subscriber::prelude::*;

        let os_log = tracing_oslog::OsLogger::new("com.kasookoo.sdk", "calls");

        let log_path = std::path::Path::new(data_dir).join("kasookoo.log");
        let _ = std::fs::create_dir_all(data_dir);
        let env_filter = tracing_subscriber::EnvFilter::new(MOBILE_FILTER);

        let file_layer = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
            });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(os_log)
            .with(file_layer)
            .try_init();
    }

    #[cfg(target_os = "android")]
    {
        use tracing_subscriber::prelude::*;

        let android_layer = paranoid_android::layer("kasookoo")
            .with_filter(tracing_subscriber::EnvFilter::new(MOBILE_FILTER));

        let _ = tracing_subscriber::registry()
            .with(android_layer)
            .try_init();
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "kasookoo_core=debug,info".into()),
            )
            .try_init();
    }
}

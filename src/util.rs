use std::path::PathBuf;

const MODEL_RUNNER_BIN: &str = "MODEL_RUNNER_BIN";

const DEFAULT_RUNNER_BIN: &str = "model-runner";

pub fn get_runner_bin() -> PathBuf {
    let bin_from_env = std::env::var(MODEL_RUNNER_BIN);
    bin_from_env.map_or_else(|_| PathBuf::from(DEFAULT_RUNNER_BIN), PathBuf::from)
}

const SWAPPER_CONCURRENCY: &str = "SWAPPER_CONCURRENCY";

pub fn get_concurrency_override() -> Option<usize> {
    let concurrency_from_env = std::env::var(SWAPPER_CONCURRENCY);
    concurrency_from_env.ok().and_then(|res| res.parse().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Run(#[from] pump_engine::RunError),

    #[error("server: {0}")]
    Serve(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

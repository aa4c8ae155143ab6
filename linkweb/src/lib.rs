pub mod commands;
pub mod handlers;
pub mod server;

pub use commands::{CLAP_STYLING, command_argument_builder};
pub use handlers::{allowed_origins, config_from_args, expand_db_path, format_edge, open_store};
pub use server::{ApiError, ApiState, LookupResponse, build_router};

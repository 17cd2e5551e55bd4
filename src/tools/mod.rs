//! Capabilities behind the Chinook assistant's tool calls.
//!
//! # Module Structure
//!
//! - [`capability`](crate::tools::capability) - Closed capability set and tool descriptors
//! - [`text2sql`](crate::tools::text2sql) - Question to SQLite translation
//! - [`chart`](crate::tools::chart) - Plotting-script generation
//! - [`sandbox`](crate::tools::sandbox) - Isolated script execution
//!
//! # Flow
//!
//! ```ignore
//! let sql = translator.translate("How many employees does Chinook have?").await?;
//! let rows = database.execute(&sql).await?;
//! let artifact = charts.render("Plot employees per country", &rows).await?;
//! println!("{}", artifact.data_url());
//! ```

/// Capability enum decoded from model tool calls.
pub mod capability;
/// Chart generation through the sandbox.
pub mod chart;
/// Sandboxed execution of generated code.
pub mod sandbox;
/// Natural language to SQL.
pub mod text2sql;

pub use capability::{tool_definitions, Capability, DecodedCall, TextualRequest, VisualRequest};
pub use chart::ChartGenerator;
pub use sandbox::{Artifact, CodeRunner, SandboxRunner};
pub use text2sql::{strip_code_fences, SqlTranslator};

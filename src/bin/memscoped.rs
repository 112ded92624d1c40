//! memscope daemon - remote memory-introspection server
//!
//! Accepts connections from instrumented processes, reads the memory
//! they register, and publishes watch and log events.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:11037 with the default key
//! memscoped
//!
//! # Use a config file and print events as JSON lines
//! memscoped --config ./memscope.toml --json
//! ```

fn main() -> anyhow::Result<()> {
    memscoped::app::run()
}

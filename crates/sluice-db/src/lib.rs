//! Task Store: configuration, pool bootstrap, migrations, models, and the
//! query modules for the `tasks`, `executions`, `metrics`, and
//! `server_configs` tables.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
pub mod rules;

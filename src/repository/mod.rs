//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against a SQLite job source: submitted print jobs and judged submissions
//! awaiting a result ticket.

pub mod diesel_models;
pub mod diesel_pool;
pub mod diesel_print_job;
pub mod diesel_ticket;
pub mod util;

pub use diesel_models::{NewPrintJob, PrintJobRecord, TicketSubmitRecord};
pub use diesel_pool::{AsyncSqlitePool, DieselError};
pub use diesel_print_job::{DieselPrintJobRepository, PrintJobSubmission, DEFAULT_CHARSET};
pub use diesel_ticket::{DieselTicketRepository, JudgedSubmit};

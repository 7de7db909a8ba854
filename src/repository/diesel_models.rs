//! Diesel ORM models for database tables.

use diesel::prelude::*;

use crate::schema;

/// Print job row as stored in the source table.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::print_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PrintJobRecord {
    pub id: i64,
    pub filename: String,
    pub printer: String,
    pub contest_id: i64,
    pub contest_name: String,
    pub team_id: i64,
    pub team_name: String,
    pub team_num: Option<i32>,
    pub computer_id: String,
    pub computer_name: String,
    pub area_id: i64,
    pub area_name: String,
    pub charset: String,
    pub data: Vec<u8>,
    pub arrived_at: i64,
    pub modified_at: i64,
    pub claimed_at: Option<i64>,
}

/// New print job for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::print_jobs)]
pub struct NewPrintJob<'a> {
    pub filename: &'a str,
    pub printer: &'a str,
    pub contest_id: i64,
    pub contest_name: &'a str,
    pub team_id: i64,
    pub team_name: &'a str,
    pub team_num: Option<i32>,
    pub computer_id: &'a str,
    pub computer_name: &'a str,
    pub area_id: i64,
    pub area_name: &'a str,
    pub charset: &'a str,
    pub data: &'a [u8],
    pub arrived_at: i64,
    pub modified_at: i64,
}

/// Judged submission row backing result tickets.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::ticket_submits)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TicketSubmitRecord {
    pub id: i64,
    pub printer: String,
    pub contest_id: i64,
    pub contest_name: String,
    pub team_id: i64,
    pub team_name: String,
    pub team_num: Option<i32>,
    pub problem_id: String,
    pub problem_name: String,
    pub computer_id: String,
    pub computer_name: String,
    pub area_id: i64,
    pub area_name: String,
    pub arrived: i64,
    pub compiled: bool,
    pub school_mode: bool,
    pub tests_taken: i32,
    pub tests_passed: i32,
    pub failed_result: Option<String>,
    pub failed_test: Option<i32>,
    pub judged_at: i64,
    pub printed_at: Option<i64>,
}

/// Judged submission for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::ticket_submits)]
pub struct NewTicketSubmit<'a> {
    pub id: i64,
    #[diesel(embed)]
    pub fields: TicketSubmitFields<'a>,
}

/// Every column a (re-)judging writes.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::ticket_submits)]
#[diesel(treat_none_as_null = true)]
pub struct TicketSubmitFields<'a> {
    pub printer: &'a str,
    pub contest_id: i64,
    pub contest_name: &'a str,
    pub team_id: i64,
    pub team_name: &'a str,
    pub team_num: Option<i32>,
    pub problem_id: &'a str,
    pub problem_name: &'a str,
    pub computer_id: &'a str,
    pub computer_name: &'a str,
    pub area_id: i64,
    pub area_name: &'a str,
    pub arrived: i64,
    pub compiled: bool,
    pub school_mode: bool,
    pub tests_taken: i32,
    pub tests_passed: i32,
    pub failed_result: Option<&'a str>,
    pub failed_test: Option<i32>,
    pub judged_at: i64,
}

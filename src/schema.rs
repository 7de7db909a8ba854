// Diesel table definitions for the job source store.
// Timestamps are unix milliseconds.

diesel::table! {
    print_jobs (id) {
        id -> BigInt,
        filename -> Text,
        printer -> Text,
        contest_id -> BigInt,
        contest_name -> Text,
        team_id -> BigInt,
        team_name -> Text,
        team_num -> Nullable<Integer>,
        computer_id -> Text,
        computer_name -> Text,
        area_id -> BigInt,
        area_name -> Text,
        charset -> Text,
        data -> Binary,
        arrived_at -> BigInt,
        modified_at -> BigInt,
        claimed_at -> Nullable<BigInt>,
    }
}

diesel::table! {
    ticket_submits (id) {
        id -> BigInt,
        printer -> Text,
        contest_id -> BigInt,
        contest_name -> Text,
        team_id -> BigInt,
        team_name -> Text,
        team_num -> Nullable<Integer>,
        problem_id -> Text,
        problem_name -> Text,
        computer_id -> Text,
        computer_name -> Text,
        area_id -> BigInt,
        area_name -> Text,
        arrived -> BigInt,
        compiled -> Bool,
        school_mode -> Bool,
        tests_taken -> Integer,
        tests_passed -> Integer,
        failed_result -> Nullable<Text>,
        failed_test -> Nullable<Integer>,
        judged_at -> BigInt,
        printed_at -> Nullable<BigInt>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(print_jobs, ticket_submits);

//! Centralized prompt definitions for the router's pipes
//!
//! System prompts are installed on the pipes at startup; the builder
//! functions produce the per-request user messages.

/// System prompt for the dry-run planner pipe.
///
/// The planner only names the tool it would call; it never sees tool output.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are the planning step of a university assistant. Decide which single tool, if any, should be used to answer the user's query. Do NOT answer the query and do NOT call the tool yourself.

Available tools:
- "University regulations retriever": academic regulations, exam rules, guidelines.
- "Calendar events retriever": upcoming campus events, lectures, meetings.
- "Student data table tool": questions about enrolled students, semesters, courses, tuition fees.
- "Current date and time tool": the current date or time.

Your response MUST be valid JSON in exactly one of these forms:
{"action": "<tool name>", "action_input": "<input for the tool>"}
{"final_answer": "<short reply when no tool is needed>"}

Always respond with valid JSON only, no other text."#;

/// System prompt for the answer pipe.
pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are a helpful university assistant. Answer concisely and only from the information you are given. If the provided context does not contain the answer, say so plainly."#;

/// System prompt for the natural-language-to-SQL pipe.
pub const STUDENT_SQL_SYSTEM_PROMPT: &str = r#"You translate questions about university students into a single SQLite SELECT statement over this table:

students(id INTEGER, name TEXT, surname TEXT, nationality TEXT, semester INTEGER, all_courses TEXT, discount_rate TEXT, tuition_fees REAL)

all_courses is a comma-separated list. discount_rate is text such as '30%'.

Your response MUST be valid JSON in this exact format:
{"sql": "SELECT ..."}

Never write INSERT, UPDATE, DELETE, DROP, ALTER or any statement other than one SELECT (a leading WITH clause is allowed)."#;

/// System prompt for the SAFE/MODIFY guard pipe.
pub const GUARD_SYSTEM_PROMPT: &str = r#"You guard a table of student records. Respond with exactly one word: SAFE if the request only reads data, MODIFY if it would insert, update, delete, or otherwise change the table or its schema."#;

/// Fixed refusal returned when the guard classifies a request as MODIFY.
pub const MODIFICATION_REFUSAL: &str =
    "Modification blocked: This query is not allowed. Only read-only queries are permitted.";

/// Note attached to state after a similarity search.
pub const RETRIEVAL_NOTE: &str = "Documents retrieved based on similarity search.";

/// Column list shown to the guard classifier.
pub const STUDENT_COLUMNS: &[&str] = &[
    "name",
    "surname",
    "nationality",
    "semester",
    "all_courses",
    "discount_rate",
    "tuition_fees",
];

/// Instruction for the direct-answer path.
pub fn direct_answer_prompt(query: &str) -> String {
    format!("Without using any tools respond to this query {}", query)
}

/// Instruction for answer generation over retrieved context.
pub fn generation_prompt(tool_name: &str, context: &str, query: &str) -> String {
    format!(
        "Use the information the tool '{}' returned to answer this question.\n\nContext:\n{}\n\nNow, answer the user query:\n{}",
        tool_name, context, query
    )
}

/// Instruction handed to the student data agent when running reviewed code.
pub fn execute_code_prompt(code: &str) -> String {
    format!(
        "Execute the following SQL query against the students table and report the result:\n{}",
        code
    )
}

/// Guard classifier input.
pub fn guard_prompt(query: &str) -> String {
    format!(
        "The students table has the following columns: {:?}.\nDetermine if the following request entails the modification of the table:\n{}\nRespond with 'SAFE' if it only reads data, otherwise respond with 'MODIFY'.",
        STUDENT_COLUMNS, query
    )
}

/// Request for narrating SQL rows as an answer.
pub fn narrate_rows_prompt(question: &str, sql: &str, rows: &str) -> String {
    format!(
        "Question: {}\n\nSQL executed:\n{}\n\nResult rows:\n{}\n\nAnswer the question from these rows.",
        question, sql, rows
    )
}

use super::CallSite;

pub fn system_prompt(call_site: CallSite) -> &'static str {
    match call_site {
        CallSite::TermExtraction => {
            "You pick literal values out of questions about a database. Reply with a comma separated list and nothing else."
        }
        CallSite::Resolvability => {
            "You judge whether a question can be answered from a SQLite database. Be generous: only reject questions about data the schema clearly does not hold."
        }
        CallSite::Generation | CallSite::Correction => {
            "You write SQLite queries. Reply with exactly one SELECT statement and no commentary."
        }
        CallSite::Validation => {
            "You check whether query results answer the question that was asked."
        }
        CallSite::FinalClassification => {
            "You explain query results to a non-technical reader and choose how to present them."
        }
    }
}

pub fn term_extraction_prompt(user_query: &str) -> String {
    format!(
        "List the specific values in this question that could appear verbatim in database rows \
         (names, codes, places, categories). Skip generic words such as total, count, show or list.\n\n\
         Question: {user_query}\n\nValues:"
    )
}

pub fn resolvability_prompt(user_query: &str, schema: &str, evidence: &str) -> String {
    format!(
        "## Question\n{user_query}\n\n## Schema\n{schema}\n\n## Matching rows\n{evidence}\n\n\
         Mark the question resolvable if any table or column could plausibly answer it, even partially.\n\
         Mark it unresolvable only when the subject is absent from the schema.\n\n\
         Reply in this form:\n\
         RESOLVABLE: yes/no\n\
         MESSAGE: a short friendly explanation for the user\n\
         REASONING: the technical reasoning"
    )
}

pub fn generation_prompt(user_query: &str, schema: &str, evidence: &str) -> String {
    format!(
        "## Question\n{user_query}\n\n## Schema\n{schema}\n\n## Matching rows\n{evidence}\n\n\
         Use the matching rows to pick exact table names, column names and literal values.\n\
         Reply with the SQLite query only."
    )
}

pub fn correction_prompt(
    user_query: &str,
    failed_sql: &str,
    error_message: &str,
    schema: &str,
    evidence: &str,
) -> String {
    format!(
        "The query below was written for the question but failed.\n\n\
         ## Question\n{user_query}\n\n## Failed query\n{failed_sql}\n\n## Error\n{error_message}\n\n\
         ## Schema\n{schema}\n\n## Matching rows\n{evidence}\n\n\
         Compare the error against the schema and fix the query.\n\
         Reply with the corrected SQLite query only."
    )
}

pub fn validation_prompt(user_query: &str, sql: &str, results: &str, row_count: usize) -> String {
    format!(
        "## Question\n{user_query}\n\n## Query\n{sql}\n\n## Results ({row_count} rows)\n{results}\n\n\
         Decide whether these results answer the question. Check the aggregation level, filters and limits.\n\n\
         Reply in this form:\n\
         VALID: yes/no\n\
         REASON: why\n\
         SUGGESTIONS: what to change, or leave empty"
    )
}

pub fn final_prompt(user_query: &str, sql: &str, results: &str, row_count: usize) -> String {
    format!(
        "## Question\n{user_query}\n\n## Query\n{sql}\n\n## Results ({row_count} rows)\n{results}\n\n\
         A single value is text. Rows of records are a table. Comparisons, trends and distributions are a chart.\n\n\
         Reply in this form:\n\
         RESULT_TYPE: text/table/chart\n\
         CHART_TYPE: bar/line/scatter/pie or N/A\n\
         MESSAGE: a friendly explanation of the result\n\
         INSIGHTS: notable patterns, or leave empty"
    )
}

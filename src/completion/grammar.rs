use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

const KNOWN_KEYS: &[&str] = &[
    "RESOLVABLE",
    "MESSAGE",
    "REASONING",
    "SQL",
    "VALID",
    "REASON",
    "SUGGESTIONS",
    "RESULT_TYPE",
    "CHART_TYPE",
    "INSIGHTS",
    "TERMS",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("response is empty")]
    EmptyResponse,

    #[error("response is missing field {0}")]
    MissingField(&'static str),

    #[error("field {field} has unexpected value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("response grammar pattern failed to compile: {0}")]
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvabilityAnswer {
    pub resolvable: bool,
    pub message: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub reason: String,
    pub suggestions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Text,
    Table,
    Chart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalClassification {
    pub result_type: ResultKind,
    pub chart_type: Option<String>,
    pub message: String,
    pub insights: String,
}

#[derive(Debug, Default)]
struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn text(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }
}

fn field_line_regex() -> Result<&'static Regex, GrammarError> {
    static FIELD_LINE: OnceCell<Regex> = OnceCell::new();
    FIELD_LINE.get_or_try_init(|| {
        let pattern = format!(
            r"(?i)^\s*[-*#>\s]*\**\s*(?P<key>{})\s*\**\s*[:=]\s*\**\s*(?P<value>.*)$",
            KNOWN_KEYS.join("|")
        );
        Regex::new(&pattern).map_err(|err| GrammarError::Pattern(err.to_string()))
    })
}

fn parse_fields(text: &str) -> Result<Fields, GrammarError> {
    let regex = field_line_regex()?;
    let mut fields = Fields::default();
    for line in text.lines() {
        if let Some(captures) = regex.captures(line) {
            let key = captures["key"].to_ascii_uppercase();
            let value = captures["value"].trim().trim_end_matches("**").trim().to_string();
            match fields.entries.iter_mut().find(|(name, _)| *name == key) {
                Some(entry) => entry.1 = value,
                None => fields.entries.push((key, value)),
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some((_, value)) = fields.entries.last_mut() {
            if !value.is_empty() {
                value.push('\n');
            }
            value.push_str(trimmed);
        }
    }
    Ok(fields)
}

fn parse_yes_no(field: &'static str, raw: &str) -> Result<bool, GrammarError> {
    let normalized = raw
        .trim()
        .trim_matches(|ch: char| ch == '*' || ch == '"' || ch == '\'' || ch == '.' || ch == '[' || ch == ']')
        .to_ascii_lowercase();
    let first_word = normalized.split_whitespace().next().unwrap_or_default();
    match first_word.trim_end_matches([',', '.', ';']) {
        "yes" | "true" | "y" => Ok(true),
        "no" | "false" | "n" => Ok(false),
        _ => Err(GrammarError::InvalidValue {
            field,
            value: raw.trim().to_string(),
        }),
    }
}

pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

pub fn parse_terms(text: &str) -> Result<Vec<String>, GrammarError> {
    let body = strip_code_fence(text);
    let body = body
        .split_once(':')
        .filter(|(head, _)| head.trim().eq_ignore_ascii_case("terms"))
        .map(|(_, tail)| tail)
        .unwrap_or(body);

    let mut out = Vec::<String>::new();
    for raw in body.split([',', '\n']) {
        let term = raw
            .trim()
            .trim_start_matches(|ch: char| ch == '-' || ch == '*' || ch == '•')
            .trim()
            .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '`' || ch == '[' || ch == ']')
            .trim();
        if term.is_empty() || out.iter().any(|existing| existing == term) {
            continue;
        }
        out.push(term.to_string());
    }

    if out.is_empty() {
        return Err(GrammarError::EmptyResponse);
    }
    Ok(out)
}

pub fn parse_resolvability(text: &str) -> Result<ResolvabilityAnswer, GrammarError> {
    if text.trim().is_empty() {
        return Err(GrammarError::EmptyResponse);
    }
    let fields = parse_fields(text)?;
    let raw = fields
        .get("RESOLVABLE")
        .ok_or(GrammarError::MissingField("RESOLVABLE"))?;
    Ok(ResolvabilityAnswer {
        resolvable: parse_yes_no("RESOLVABLE", raw)?,
        message: fields.text("MESSAGE"),
        reasoning: fields.text("REASONING"),
    })
}

pub fn parse_sql(text: &str) -> Result<String, GrammarError> {
    let mut body = strip_code_fence(text);
    if let Some(head) = body.get(..4) {
        if head.eq_ignore_ascii_case("sql:") {
            body = strip_code_fence(&body[4..]);
        }
    }
    let sql = body.trim();
    if sql.is_empty() {
        return Err(GrammarError::EmptyResponse);
    }
    Ok(sql.to_string())
}

pub fn parse_validation(text: &str) -> Result<ValidationVerdict, GrammarError> {
    if text.trim().is_empty() {
        return Err(GrammarError::EmptyResponse);
    }
    let fields = parse_fields(text)?;
    let raw = fields.get("VALID").ok_or(GrammarError::MissingField("VALID"))?;
    Ok(ValidationVerdict {
        valid: parse_yes_no("VALID", raw)?,
        reason: fields.text("REASON"),
        suggestions: fields.text("SUGGESTIONS"),
    })
}

pub fn parse_final(text: &str) -> Result<FinalClassification, GrammarError> {
    if text.trim().is_empty() {
        return Err(GrammarError::EmptyResponse);
    }
    let fields = parse_fields(text)?;
    let raw = fields
        .get("RESULT_TYPE")
        .ok_or(GrammarError::MissingField("RESULT_TYPE"))?;
    let result_type = match raw.trim().trim_matches(['[', ']']).to_ascii_lowercase().as_str() {
        "text" => ResultKind::Text,
        "table" => ResultKind::Table,
        "chart" => ResultKind::Chart,
        _ => {
            return Err(GrammarError::InvalidValue {
                field: "RESULT_TYPE",
                value: raw.trim().to_string(),
            });
        }
    };

    let chart_type = fields
        .get("CHART_TYPE")
        .map(|value| value.trim().trim_matches(['[', ']']).to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != "n/a" && value != "na" && value != "none");

    Ok(FinalClassification {
        result_type,
        chart_type,
        message: fields.text("MESSAGE"),
        insights: fields.text("INSIGHTS"),
    })
}

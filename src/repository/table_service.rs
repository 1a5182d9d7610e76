use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, PgExecutor, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "invoice_items",
    "invoices",
    "lease_charges",
    "leases",
    "notifications",
    "organization_members",
];

pub async fn list_rows<'e, E>(
    executor: E,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError>
where
    E: PgExecutor<'e>,
{
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query.push(" LIMIT ").push_bind(limit.clamp(1, 5000));

    let rows = query
        .build()
        .fetch_all(executor)
        .await
        .map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn find_row<'e, E>(
    executor: E,
    table: &str,
    row_id: &str,
) -> Result<Option<Value>, AppError>
where
    E: PgExecutor<'e>,
{
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, row_id);
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

/// `find_row` that takes a row lock held until the surrounding transaction
/// ends.
pub async fn lock_row(
    conn: &mut PgConnection,
    table: &str,
    row_id: &str,
) -> Result<Option<Value>, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_id_filter(&mut query, row_id);
    query.push(" FOR UPDATE");

    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn create_row<'e, E>(
    executor: E,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: PgExecutor<'e>,
{
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_keys(payload)?;

    // jsonb_populate_record lets PostgreSQL coerce uuid, enum, date and
    // numeric columns from the JSON payload.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row<'e, E>(
    executor: E,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError>
where
    E: PgExecutor<'e>,
{
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_id_filter(&mut query, row_id);
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(executor)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

/// Decode a `row_to_json` value into a typed record.
pub fn decode_row<T: DeserializeOwned>(table: &str, row: Value) -> Result<T, AppError> {
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, error = %error, "Could not decode database row");
        AppError::Internal(format!("Malformed {table} record."))
    })
}

pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Result<Vec<T>, AppError> {
    rows.into_iter().map(|row| decode_row(table, row)).collect()
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let valid_chars = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    });
    let starts_with_digit = trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit());
    if !valid_chars || starts_with_digit {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
}

/// `role__in` and `role` name the same column; arrays match any element.
fn filter_column(filter_key: &str) -> Result<&str, AppError> {
    let column = filter_key.strip_suffix("__in").unwrap_or(filter_key);
    validate_identifier(column)
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let column = filter_column(filter_key)?;

    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(());
            }
            let texts = items.iter().map(render_scalar).collect::<Vec<_>>();
            query
                .push(" AND t.")
                .push(column)
                .push("::text = ANY(")
                .push_bind(texts)
                .push(")");
            Ok(())
        }
        _ => {
            query.push(" AND ");
            push_scalar_filter(query, column, &infer_scalar_filter(column, value));
            Ok(())
        }
    }
}

fn push_id_filter(query: &mut QueryBuilder<Postgres>, row_id: &str) {
    push_scalar_filter(
        query,
        "id",
        &infer_scalar_filter("id", &Value::String(row_id.to_string())),
    );
}

fn push_scalar_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ScalarFilter) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn infer_scalar_filter(column: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::String(text) => {
            if is_uuid_identifier(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(text.trim()) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        _ => ScalarFilter::Text(render_scalar(value)),
    }
}

fn is_uuid_identifier(identifier: &str) -> bool {
    identifier == "id" || identifier.ends_with("_id")
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    let unique_violation = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code == "23505");
    if unique_violation
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

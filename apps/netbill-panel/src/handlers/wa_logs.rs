use axum::{
    Extension, Json,
    extract::{Query, State},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use netbill_db::models::campaign::WaMessageLog;
use netbill_shared::api::CursorPage;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::TenantContext;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Opaque to callers: base64 of `<created_at>|<id>` of the last row served.
pub fn encode_cursor(created_at: DateTime<Utc>, id: Uuid) -> String {
    STANDARD.encode(format!("{}|{}", created_at.to_rfc3339_opts(SecondsFormat::Micros, true), id))
}

pub fn decode_cursor(raw: &str) -> Result<(DateTime<Utc>, Uuid), AppError> {
    let invalid = || AppError::InputInvalid("invalid cursor".into());
    // '+' arrives as a space when the cursor was not percent-encoded.
    let bytes = STANDARD.decode(raw.trim().replace(' ', "+")).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (ts, id) = text.split_once('|').ok_or_else(invalid)?;
    let ts = DateTime::parse_from_rfc3339(ts).map_err(|_| invalid())?.with_timezone(&Utc);
    let id = id.parse::<Uuid>().map_err(|_| invalid())?;
    Ok((ts, id))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<LogQuery>,
) -> AppResult<Json<CursorPage<WaMessageLog>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let cursor = query
        .cursor
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(decode_cursor)
        .transpose()?;

    let mut items = state.wa_logs.list_page(tenant.id, cursor, limit + 1).await?;
    let next_cursor = if items.len() as i64 > limit {
        items.truncate(limit as usize);
        items.last().map(|last| encode_cursor(last.created_at, last.id))
    } else {
        None
    };
    Ok(Json(CursorPage { items, next_cursor }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cursor_survives_unencoded_query_strings() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap() + chrono::Duration::microseconds(123_456);
        let id = Uuid::new_v4();
        let cursor = encode_cursor(ts, id);
        assert_eq!(decode_cursor(&cursor).unwrap(), (ts, id));
        assert_eq!(decode_cursor(&cursor.replace('+', " ")).unwrap(), (ts, id));
    }

    #[test]
    fn garbage_cursors_are_input_errors() {
        for raw in ["%%%", "bm9waXBl", &STANDARD.encode("yesterday|not-a-uuid")] {
            assert_eq!(decode_cursor(raw).unwrap_err().code(), "input_invalid");
        }
    }
}

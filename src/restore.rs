//! Replay of a JSON-lines booking backup through the normal create path.
//!
//! Each line is one booking as it was exported. Quotas still apply, so a
//! backup can never overfill an office; the bookable window and reason
//! notifications do not.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::booking::{BookingError, BookingService, CreateMode};
use crate::model::{CreateBooking, Ms, OfficeRef, User};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreBooking {
    pub id: String,
    pub created: Ms,
    pub office: OfficeRef,
    pub date: String,
    pub user: String,
    #[serde(default)]
    pub parking: bool,
    #[serde(default)]
    pub reason_to_book: Option<String>,
}

impl From<RestoreBooking> for CreateBooking {
    fn from(b: RestoreBooking) -> Self {
        CreateBooking {
            office: b.office,
            date: b.date,
            user: b.user,
            parking: Some(b.parking),
            reason_to_book: b.reason_to_book,
            id: Some(b.id),
            created: Some(b.created),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Already present (same user and day, or same id).
    pub duplicates: usize,
    /// Malformed lines and rejected bookings.
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("reading backup: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn restore_bookings<R>(
    service: &BookingService,
    admin: &User,
    reader: R,
) -> Result<RestoreReport, RestoreError>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = RestoreReport::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let booking: RestoreBooking = match serde_json::from_str(&line) {
            Ok(b) => b,
            Err(e) => {
                warn!("backup line {line_no}: malformed: {e}");
                report.failed += 1;
                continue;
            }
        };
        let id = booking.id.clone();
        match service
            .create_booking_with(admin, booking.into(), CreateMode::Restore)
            .await
        {
            Ok(_) => report.restored += 1,
            Err(BookingError::Conflict { .. }) => report.duplicates += 1,
            Err(e) => {
                warn!("backup line {line_no}: booking {id} not restored: {}", e.http_message());
                report.failed += 1;
            }
        }
    }
    info!(
        "restore finished: {} restored, {} duplicates, {} failed",
        report.restored, report.duplicates, report.failed
    );
    Ok(report)
}

pub async fn restore_file(
    service: &BookingService,
    admin: &User,
    path: &Path,
) -> Result<RestoreReport, RestoreError> {
    let file = tokio::fs::File::open(path).await?;
    restore_bookings(service, admin, BufReader::new(file)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_line_maps_to_request() {
        let line = r#"{"id":"leeds_20240301","created":1709251200000,"office":{"id":"leeds"},"date":"2024-03-01","user":"A@x.com","parking":true}"#;
        let booking: RestoreBooking = serde_json::from_str(line).unwrap();
        let request: CreateBooking = booking.into();
        assert_eq!(request.id.as_deref(), Some("leeds_20240301"));
        assert_eq!(request.created, Some(1_709_251_200_000));
        assert_eq!(request.parking, Some(true));
        assert_eq!(request.reason_to_book, None);
    }
}

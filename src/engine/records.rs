use async_trait::async_trait;

use crate::limits::*;
use crate::model::*;
use crate::store::BookingStore;

use super::{Engine, EngineError};

#[async_trait]
impl BookingStore for Engine {
    async fn create(&self, booking: Booking) -> Result<Created, EngineError> {
        if booking.id.is_empty() || booking.id.len() > MAX_BOOKING_ID_LEN {
            return Err(EngineError::LimitExceeded("booking id length"));
        }
        if booking.user.is_empty() || booking.user.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email length"));
        }
        let _gate = self.gate.read().await;
        let mut table = self.bookings.write().await;
        // One booking per user per day; a replayed id may also already be present.
        if table.on_day(&booking.user, booking.date).is_some()
            || table.find(&booking.user, &booking.id).is_some()
        {
            return Ok(Created::Duplicate);
        }
        self.persist(Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        table.insert(booking.clone());
        Ok(Created::Booking(booking))
    }

    async fn delete(&self, id: &str, user: &str) -> Result<Option<Booking>, EngineError> {
        let _gate = self.gate.read().await;
        let mut table = self.bookings.write().await;
        if table.find(user, id).is_none() {
            return Ok(None);
        }
        self.persist(Event::BookingDeleted {
            id: id.to_string(),
            user: user.to_string(),
        })
        .await?;
        Ok(table.remove(user, id))
    }

    async fn query(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError> {
        let table = self.bookings.read().await;
        let mut found: Vec<Booking> = match &query.user {
            Some(user) => table
                .for_user(user)
                .filter(|b| query.matches(b))
                .cloned()
                .collect(),
            None => table.iter().filter(|b| query.matches(b)).cloned().collect(),
        };
        found.sort_by(|a, b| {
            (a.date, &a.office_id, &a.user).cmp(&(b.date, &b.office_id, &b.user))
        });
        Ok(found)
    }
}

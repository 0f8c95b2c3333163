//! Typed reads and writes against the shared store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use serde_json::json;
use slotwatch_postgrest::{NullsOrder, PostgrestClient, SortOrder};

use crate::config::ClientOptions;
use crate::error::Error;
use crate::models::{Appointment, AvailabilityFilter, Office, ScrapeRun, Subscriber};

pub const APPOINTMENTS_TABLE: &str = "appointments";
pub const SCRAPE_RUNS_TABLE: &str = "scrape_runs";
pub const SUBSCRIBERS_TABLE: &str = "email_subscribers";

/// Predicates of an appointment read. An empty office set means every office.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub offices: BTreeSet<Office>,
    pub availability: AvailabilityFilter,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.availability.matches(appointment)
            && (self.offices.is_empty() || self.offices.contains(&appointment.office))
    }
}

/// Read/write surface the views and the registrar depend on.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Appointments matching `filter`, in canonical order.
    async fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, Error>;

    /// Golden, available appointments in canonical order.
    async fn golden_slots(&self) -> Result<Vec<Appointment>, Error>;

    /// The run with the latest non-null `completed_at`.
    async fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, Error>;

    /// Insert or reactivate a subscriber keyed on email.
    async fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), Error>;
}

/// [`SlotStore`] backed by the project's PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct StoreClient {
    url: String,
    key: String,
    http_client: Client,
    options: ClientOptions,
}

impl StoreClient {
    pub fn new(url: &str, key: &str, http_client: Client, options: ClientOptions) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            http_client,
            options,
        }
    }

    /// Query builder for `table` with the configured timeout and schema applied.
    pub fn from(&self, table: &str) -> Result<PostgrestClient, Error> {
        let client = PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone())
            .with_timeout(self.options.request_timeout);

        if self.options.db_schema == "public" {
            return Ok(client);
        }
        Ok(client
            .with_header("Accept-Profile", &self.options.db_schema)?
            .with_header("Content-Profile", &self.options.db_schema)?)
    }
}

/// golden desc, available desc, date asc, time asc nulls first, id asc.
fn canonical_order(query: PostgrestClient) -> PostgrestClient {
    query
        .order("is_golden", SortOrder::Descending)
        .order("available", SortOrder::Descending)
        .order("appointment_date", SortOrder::Ascending)
        .order_nulls("appointment_time", SortOrder::Ascending, NullsOrder::First)
        .order("id", SortOrder::Ascending)
}

#[async_trait]
impl SlotStore for StoreClient {
    async fn appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, Error> {
        let mut query = self.from(APPOINTMENTS_TABLE)?.select("*");
        query = match filter.availability {
            AvailabilityFilter::AvailableOnly => query.eq("available", "true"),
            AvailabilityFilter::GoneOnly => query.eq("available", "false"),
            AvailabilityFilter::All => query,
        };
        if !filter.offices.is_empty() {
            let offices: Vec<&str> = filter.offices.iter().map(Office::as_str).collect();
            query = query.in_list("office", &offices);
        }

        let rows = canonical_order(query).execute::<Appointment>().await?;
        trace!("Fetched {} appointments for {:?}", rows.len(), filter);
        Ok(rows)
    }

    async fn golden_slots(&self) -> Result<Vec<Appointment>, Error> {
        let query = self
            .from(APPOINTMENTS_TABLE)?
            .select("*")
            .eq("is_golden", "true")
            .eq("available", "true");
        Ok(canonical_order(query).execute::<Appointment>().await?)
    }

    async fn latest_scrape_run(&self) -> Result<Option<ScrapeRun>, Error> {
        let run = self
            .from(SCRAPE_RUNS_TABLE)?
            .select("*")
            .not_null("completed_at")
            .order_nulls("completed_at", SortOrder::Descending, NullsOrder::Last)
            .execute_one::<ScrapeRun>()
            .await?;
        Ok(run)
    }

    async fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), Error> {
        debug!("Upserting subscriber");
        self.from(SUBSCRIBERS_TABLE)?
            .upsert(
                json!({ "email": subscriber.email, "active": subscriber.active }),
                "email",
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn appointment_row(office: &str, available: bool) -> serde_json::Value {
        json!({
            "id": "6f1c1a3e-6d1b-4c55-a4b5-1f0a8a5e2f10",
            "office": office,
            "appointment_type": "Driver License Renewal",
            "appointment_date": "2026-02-13",
            "appointment_time": null,
            "slot_type": "future",
            "is_golden": false,
            "is_current_closest": false,
            "available": available,
            "first_seen_at": "2026-02-11T15:00:00+00:00",
            "last_seen_at": "2026-02-11T16:00:00+00:00",
            "book_url": ""
        })
    }

    fn store(server: &MockServer) -> StoreClient {
        StoreClient::new(&server.uri(), "anon", Client::new(), ClientOptions::default())
    }

    #[tokio::test]
    async fn test_appointments_query_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("select", "*"))
            .and(query_param("available", "eq.false"))
            .and(query_param("office", "in.(Bangor,Portland)"))
            .and(query_param(
                "order",
                "is_golden.desc,available.desc,appointment_date.asc,appointment_time.asc.nullsfirst,id.asc",
            ))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                appointment_row("Bangor", false)
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let filter = AppointmentFilter {
            offices: [Office::Portland, Office::Bangor].into_iter().collect(),
            availability: AvailabilityFilter::GoneOnly,
        };
        let rows = store(&server).appointments(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].office, Office::Bangor);
    }

    #[tokio::test]
    async fn test_golden_slots_query_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("is_golden", "eq.true"))
            .and(query_param("available", "eq.true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        assert!(store(&server).golden_slots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_scrape_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/scrape_runs"))
            .and(query_param("completed_at", "not.is.null"))
            .and(query_param("order", "completed_at.desc.nullslast"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "a3c2f0d4-8a4e-4a51-9a33-1d2f7c9b8e11",
                "run_at": "2026-02-12T14:00:00Z",
                "completed_at": "2026-02-12T14:02:10Z",
                "offices_scraped": 13,
                "golden_slots_found": 2,
                "future_slots_found": 40
            }])))
            .mount(&server)
            .await;

        let run = store(&server).latest_scrape_run().await.unwrap().unwrap();
        assert_eq!(run.offices_scraped, 13);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_upsert_subscriber_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/email_subscribers"))
            .and(query_param("on_conflict", "email"))
            .and(headers(
                "prefer",
                vec!["resolution=merge-duplicates", "return=representation"],
            ))
            .and(body_json(json!({ "email": "a@example.com", "active": true })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "email": "a@example.com", "active": true }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .upsert_subscriber(&Subscriber {
                email: "a@example.com".to_string(),
                active: true,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_custom_schema_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(header("Accept-Profile", "tracker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreClient::new(
            &server.uri(),
            "anon",
            Client::new(),
            ClientOptions::default().with_db_schema("tracker"),
        );
        store.golden_slots().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_failure_is_an_error_not_a_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "code": "XX000",
                "message": "internal error",
                "details": null,
                "hint": null
            })))
            .mount(&server)
            .await;

        let result = store(&server)
            .appointments(&AppointmentFilter::default())
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
    }
}

//! PostgreSQL storage backend.
//!
//! Uses diesel-async with a deadpool connection pool. Subscription rows are
//! interned on `(url, filter, content_type)`; subscribers reference them
//! through the `subscriber_subscriptions` link table which also carries the
//! per-link revisit interval as a native `interval` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::data_types::PgInterval;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};

use super::{ArchiveStorage, SubscriptionStorage};
use crate::error::{Error, Result};
use crate::models::{SiteRecord, Subscriber, Subscription};
use crate::schema::{sites, subscriber_subscriptions, subscribers, subscriptions};

type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Row of the `sites` table.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = sites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SiteRow {
    url: String,
    filter: String,
    content_type: String,
    last_updated: DateTime<Utc>,
    last_checked: DateTime<Utc>,
    content: Vec<u8>,
    diff: String,
    checksum: String,
}

/// Row of the interned `subscriptions` table (without the per-link interval).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SubscriptionRow {
    #[allow(dead_code)]
    id: i64,
    url: String,
    filter: String,
    content_type: String,
    use_chrome: bool,
}

/// Row of the `subscribers` table.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = subscribers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SubscriberRow {
    email: String,
    subscription_limit: i64,
}

fn interval_from_secs(secs: u64) -> PgInterval {
    PgInterval::from_microseconds(secs as i64 * 1_000_000)
}

fn interval_to_secs(interval: &PgInterval) -> u64 {
    let micros = interval.microseconds
        + i64::from(interval.days) * 86_400_000_000
        + i64::from(interval.months) * 2_592_000_000_000;
    (micros / 1_000_000).max(0) as u64
}

fn subscription_from_row(row: SubscriptionRow, interval: PgInterval) -> Subscription {
    Subscription {
        url: row.url,
        filter: row.filter,
        content_type: row.content_type,
        use_chrome: row.use_chrome,
        interval_secs: interval_to_secs(&interval),
    }
}

/// PostgreSQL implementation of both storage contracts.
#[derive(Clone)]
pub struct PgStorage {
    pool: Pool<AsyncPgConnection>,
}

impl PgStorage {
    /// Connect to the database and verify the connection works.
    pub async fn connect(uri: &str) -> Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(uri);
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|err| Error::Storage(err.to_string()))?;

        let storage = Self { pool };
        let mut conn = storage.conn().await?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(storage)
    }

    async fn conn(&self) -> Result<PgConn> {
        self.pool
            .get()
            .await
            .map_err(|err| Error::Storage(err.to_string()))
    }

    /// Create the tables if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                url TEXT NOT NULL,
                filter TEXT NOT NULL,
                content_type TEXT NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL,
                last_checked TIMESTAMPTZ NOT NULL,
                content BYTEA NOT NULL,
                diff TEXT NOT NULL DEFAULT '',
                checksum TEXT NOT NULL,
                PRIMARY KEY (url, filter, content_type)
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                id BIGSERIAL PRIMARY KEY,
                url TEXT NOT NULL,
                filter TEXT NOT NULL,
                content_type TEXT NOT NULL,
                use_chrome BOOLEAN NOT NULL DEFAULT FALSE,
                UNIQUE (url, filter, content_type)
            );

            CREATE TABLE IF NOT EXISTS subscribers (
                email TEXT PRIMARY KEY,
                subscription_limit BIGINT NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS subscriber_subscriptions (
                subscriber_email TEXT NOT NULL
                    REFERENCES subscribers(email) ON DELETE CASCADE,
                subscription_id BIGINT NOT NULL REFERENCES subscriptions(id),
                interval INTERVAL NOT NULL DEFAULT '0 seconds',
                PRIMARY KEY (subscriber_email, subscription_id)
            );
            "#,
        )
        .await
        .map_err(Error::from)
    }
}

#[async_trait]
impl ArchiveStorage for PgStorage {
    async fn get(&self, subscription: &Subscription) -> Result<SiteRecord> {
        let mut conn = self.conn().await?;
        let row: SiteRow = sites::table
            .find((
                &subscription.url,
                &subscription.filter,
                &subscription.content_type,
            ))
            .first(&mut conn)
            .await?;

        Ok(SiteRecord {
            subscription: Subscription {
                url: row.url,
                filter: row.filter,
                content_type: row.content_type,
                use_chrome: subscription.use_chrome,
                interval_secs: subscription.interval_secs,
            },
            last_updated: row.last_updated,
            last_checked: row.last_checked,
            content: row.content,
            checksum: row.checksum,
            diff: row.diff,
        })
    }

    async fn add(&self, record: &SiteRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(sites::table)
            .values((
                sites::url.eq(&record.subscription.url),
                sites::filter.eq(&record.subscription.filter),
                sites::content_type.eq(&record.subscription.content_type),
                sites::last_updated.eq(record.last_checked),
                sites::last_checked.eq(record.last_checked),
                sites::content.eq(&record.content),
                sites::diff.eq(""),
                sites::checksum.eq(&record.checksum),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn update(&self, record: &SiteRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let rows = diesel::update(sites::table.find((
            &record.subscription.url,
            &record.subscription.filter,
            &record.subscription.content_type,
        )))
        .set((
            sites::last_updated.eq(record.last_updated),
            sites::last_checked.eq(record.last_checked),
            sites::content.eq(&record.content),
            sites::diff.eq(&record.diff),
            sites::checksum.eq(&record.checksum),
        ))
        .execute(&mut conn)
        .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!(
                "site {} not archived",
                record.subscription.url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStorage for PgStorage {
    async fn find_by_subscriber(&self, email: &str) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;

        // A subscriber with zero links is still found, so probe first.
        let _subscriber: SubscriberRow = subscribers::table
            .find(email)
            .first(&mut conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::NotFound => {
                    Error::NotFound(format!("subscriber {email} not found"))
                }
                other => other.into(),
            })?;

        let rows: Vec<(SubscriptionRow, PgInterval)> = subscriptions::table
            .inner_join(subscriber_subscriptions::table)
            .filter(subscriber_subscriptions::subscriber_email.eq(email))
            .select((
                SubscriptionRow::as_select(),
                subscriber_subscriptions::interval,
            ))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(row, interval)| subscription_from_row(row, interval))
            .collect())
    }

    async fn find_by_subscription(&self, subscription: &Subscription) -> Result<Vec<Subscriber>> {
        let mut conn = self.conn().await?;

        let ids = subscriptions::table
            .filter(subscriptions::url.eq(&subscription.url))
            .filter(subscriptions::filter.eq(&subscription.filter))
            .filter(subscriptions::content_type.eq(&subscription.content_type))
            .select(subscriptions::id);

        let emails: Vec<String> = subscriber_subscriptions::table
            .filter(subscriber_subscriptions::subscription_id.eq_any(ids))
            .select(subscriber_subscriptions::subscriber_email)
            .order(subscriber_subscriptions::subscriber_email.asc())
            .load(&mut conn)
            .await?;
        drop(conn);

        let mut result = Vec::with_capacity(emails.len());
        for email in emails {
            result.push(self.get_subscriber(&email).await?);
        }
        Ok(result)
    }

    async fn subscriber_count(&self) -> Result<usize> {
        use diesel::dsl::count_star;
        let mut conn = self.conn().await?;
        let count: i64 = subscribers::table
            .select(count_star())
            .first(&mut conn)
            .await?;
        Ok(count as usize)
    }

    async fn add_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(subscribers::table)
            .values((
                subscribers::email.eq(&subscriber.email),
                subscribers::subscription_limit.eq(subscriber.subscription_limit),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_all_subscribers(&self) -> Result<Vec<Subscriber>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SubscriberRow> = subscribers::table
            .order(subscribers::email.asc())
            .load(&mut conn)
            .await?;
        drop(conn);

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let subscriptions = self.find_by_subscriber(&row.email).await?;
            result.push(Subscriber {
                email: row.email,
                subscriptions,
                subscription_limit: row.subscription_limit,
            });
        }
        Ok(result)
    }

    async fn get_subscriber(&self, email: &str) -> Result<Subscriber> {
        let mut conn = self.conn().await?;
        let row: SubscriberRow = subscribers::table
            .find(email)
            .first(&mut conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::NotFound => {
                    Error::NotFound(format!("subscriber {email} not found"))
                }
                other => other.into(),
            })?;
        drop(conn);

        let subscriptions = self.find_by_subscriber(email).await?;
        Ok(Subscriber {
            email: row.email,
            subscriptions,
            subscription_limit: row.subscription_limit,
        })
    }

    async fn add_subscription(&self, email: &str, subscription: &Subscription) -> Result<()> {
        let mut conn = self.conn().await?;

        let owner = email.to_string();
        let sub = subscription.clone();
        let interval = interval_from_secs(sub.interval_secs);

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            Box::pin(async move {
                // Intern the subscription: reuse an identity-equal row.
                let existing: Option<i64> = subscriptions::table
                    .filter(subscriptions::url.eq(&sub.url))
                    .filter(subscriptions::filter.eq(&sub.filter))
                    .filter(subscriptions::content_type.eq(&sub.content_type))
                    .select(subscriptions::id)
                    .first(conn)
                    .await
                    .optional()?;

                let id = match existing {
                    Some(id) => id,
                    None => {
                        diesel::insert_into(subscriptions::table)
                            .values((
                                subscriptions::url.eq(&sub.url),
                                subscriptions::filter.eq(&sub.filter),
                                subscriptions::content_type.eq(&sub.content_type),
                                subscriptions::use_chrome.eq(sub.use_chrome),
                            ))
                            .returning(subscriptions::id)
                            .get_result(conn)
                            .await?
                    }
                };

                diesel::insert_into(subscriber_subscriptions::table)
                    .values((
                        subscriber_subscriptions::subscriber_email.eq(&owner),
                        subscriber_subscriptions::subscription_id.eq(id),
                        subscriber_subscriptions::interval.eq(interval),
                    ))
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await
        .map_err(|err| match err {
            // Link insert referencing an unknown subscriber trips the FK.
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                _,
            ) => Error::NotFound(format!("subscriber {email} not found")),
            other => other.into(),
        })
    }

    async fn remove_subscription(&self, email: &str, subscription: &Subscription) -> Result<()> {
        let mut conn = self.conn().await?;

        let email = email.to_string();
        let sub = subscription.clone();

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            Box::pin(async move {
                let ids = subscriptions::table
                    .filter(subscriptions::url.eq(&sub.url))
                    .filter(subscriptions::filter.eq(&sub.filter))
                    .filter(subscriptions::content_type.eq(&sub.content_type))
                    .select(subscriptions::id);

                let deleted = diesel::delete(
                    subscriber_subscriptions::table
                        .filter(subscriber_subscriptions::subscriber_email.eq(&email))
                        .filter(subscriber_subscriptions::subscription_id.eq_any(ids)),
                )
                .execute(conn)
                .await?;

                if deleted == 0 {
                    return Err(diesel::result::Error::NotFound);
                }

                gc_orphaned_subscriptions(conn).await?;
                Ok(())
            })
        })
        .await
        .map_err(Error::from)
    }

    async fn remove_subscriber(&self, email: &str) -> Result<()> {
        let mut conn = self.conn().await?;

        let email = email.to_string();
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            Box::pin(async move {
                let deleted = diesel::delete(subscribers::table.find(&email))
                    .execute(conn)
                    .await?;
                if deleted == 0 {
                    return Err(diesel::result::Error::NotFound);
                }

                // Links cascade with the subscriber; orphaned interned rows
                // are cleaned up here.
                gc_orphaned_subscriptions(conn).await?;
                Ok(())
            })
        })
        .await
        .map_err(Error::from)
    }
}

/// Delete interned subscription rows no subscriber references anymore.
async fn gc_orphaned_subscriptions(
    conn: &mut AsyncPgConnection,
) -> std::result::Result<usize, diesel::result::Error> {
    diesel::sql_query(
        "DELETE FROM subscriptions s WHERE NOT EXISTS \
         (SELECT 1 FROM subscriber_subscriptions ss WHERE ss.subscription_id = s.id)",
    )
    .execute(conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercising PgStorage needs a live database; run with
    // `HTRACKER_TEST_PGURI=postgres://... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn subscription_interning_round_trip() {
        let uri = std::env::var("HTRACKER_TEST_PGURI").expect("HTRACKER_TEST_PGURI not set");
        let storage = PgStorage::connect(&uri).await.unwrap();
        storage.init_schema().await.unwrap();

        let sub = Subscription {
            url: format!("http://interning.test/{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            filter: "foo".into(),
            content_type: "text".into(),
            use_chrome: false,
            interval_secs: 3600,
        };

        let email_a = format!("a-{}@pg.test", sub.url.len());
        let email_b = format!("b-{}@pg.test", sub.url.len());
        storage
            .add_subscriber(&Subscriber::new(&email_a))
            .await
            .unwrap();
        storage
            .add_subscriber(&Subscriber::new(&email_b))
            .await
            .unwrap();

        storage.add_subscription(&email_a, &sub).await.unwrap();
        storage.add_subscription(&email_b, &sub).await.unwrap();

        let holders = storage.find_by_subscription(&sub).await.unwrap();
        assert_eq!(holders.len(), 2);

        let subs = storage.find_by_subscriber(&email_a).await.unwrap();
        assert_eq!(subs, vec![sub.clone()]);
        assert_eq!(subs[0].interval_secs, 3600);

        storage.remove_subscriber(&email_a).await.unwrap();
        storage.remove_subscriber(&email_b).await.unwrap();
        assert!(storage
            .find_by_subscription(&sub)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn interval_round_trip() {
        let interval = interval_from_secs(3661);
        assert_eq!(interval_to_secs(&interval), 3661);

        let composite = PgInterval {
            microseconds: 1_000_000,
            days: 1,
            months: 1,
        };
        assert_eq!(interval_to_secs(&composite), 1 + 86_400 + 2_592_000);
    }
}

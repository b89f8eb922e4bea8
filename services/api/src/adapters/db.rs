//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `RosterStore`, `ClearanceStore` and `AccountStore` ports from the `core`
//! crate. Roster and clearance data are schemaless JSONB documents addressed by
//! hierarchical collection paths; accounts and sessions are plain tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nodues_core::domain::{
    ClearanceRecord, Course, CourseId, Faculty, FacultyId, Partition, RecordId, StaffCredentials,
    StaffIdentity, Student, StudentClearance,
};
use nodues_core::ports::{AccountStore, ClearanceStore, PortError, PortResult, RosterStore};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports on PostgreSQL.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Collection Paths
//=========================================================================================

const FACULTY: &str = "faculty";

fn courses_path(department: &str, partition: Partition) -> String {
    format!(
        "courses/{department}/years/{}/sections/{}/courseDetails",
        partition.year, partition.section
    )
}

fn students_path(partition: Partition) -> String {
    format!("students/{}/{}", partition.year, partition.section)
}

fn clearances_path(partition: Partition) -> String {
    format!("noDues/{}/{}", partition.year, partition.section)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    doc_id: String,
    body: Json<serde_json::Value>,
    version: i64,
}
impl DocumentRecord {
    fn to_domain<T: DeserializeOwned>(self) -> PortResult<T> {
        serde_json::from_value(self.body.0).map_err(|e| {
            PortError::Unexpected(format!("Malformed document {}: {}", self.doc_id, e))
        })
    }

    /// Clearance records carry their concurrency version in the row, not the body.
    fn to_record(self) -> PortResult<ClearanceRecord> {
        let version = u64::try_from(self.version)
            .map_err(|_| PortError::Unexpected(format!("Negative version on {}", self.doc_id)))?;
        let mut record: ClearanceRecord = self.to_domain()?;
        record.version = version;
        Ok(record)
    }
}

#[derive(FromRow)]
struct AccountRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
    faculty_id: Option<String>,
    is_admin: bool,
}
impl AccountRecord {
    fn to_domain(self) -> StaffCredentials {
        StaffCredentials {
            identity: StaffIdentity {
                user_id: self.user_id,
                email: self.email,
                faculty_id: self.faculty_id.map(FacultyId),
                is_admin: self.is_admin,
            },
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct IdentityRecord {
    user_id: Uuid,
    email: String,
    faculty_id: Option<String>,
    is_admin: bool,
}
impl IdentityRecord {
    fn to_domain(self) -> StaffIdentity {
        StaffIdentity {
            user_id: self.user_id,
            email: self.email,
            faculty_id: self.faculty_id.map(FacultyId),
            is_admin: self.is_admin,
        }
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> PortResult<Json<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// Generic Document Operations
//=========================================================================================

impl DbAdapter {
    async fn list_documents<T: DeserializeOwned>(&self, collection: &str) -> PortResult<Vec<T>> {
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT doc_id, body, version FROM documents WHERE collection = $1 ORDER BY seq ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(DocumentRecord::to_domain).collect()
    }

    async fn get_document(&self, collection: &str, doc_id: &str) -> PortResult<DocumentRecord> {
        sqlx::query_as::<_, DocumentRecord>(
            "SELECT doc_id, body, version FROM documents WHERE collection = $1 AND doc_id = $2",
        )
        .bind(collection)
        .bind(doc_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Document {collection}/{doc_id} not found"))
            }
            _ => unexpected(e),
        })
    }

    async fn put_document<T: Serialize>(&self, collection: &str, doc_id: &str, body: &T) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO documents (collection, doc_id, body) VALUES ($1, $2, $3) \
             ON CONFLICT (collection, doc_id) \
             DO UPDATE SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()",
        )
        .bind(collection)
        .bind(doc_id)
        .bind(to_json(body)?)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `RosterStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RosterStore for DbAdapter {
    async fn list_courses(&self, department: &str, partition: Partition) -> PortResult<Vec<Course>> {
        self.list_documents(&courses_path(department, partition)).await
    }

    async fn list_students(&self, partition: Partition) -> PortResult<Vec<Student>> {
        self.list_documents(&students_path(partition)).await
    }

    async fn list_faculty(&self) -> PortResult<Vec<Faculty>> {
        self.list_documents(FACULTY).await
    }

    async fn get_course(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
    ) -> PortResult<Course> {
        self.get_document(&courses_path(department, partition), course_id.as_str())
            .await?
            .to_domain()
    }

    async fn get_faculty(&self, faculty_id: &FacultyId) -> PortResult<Faculty> {
        self.get_document(FACULTY, faculty_id.as_str()).await?.to_domain()
    }

    async fn claim_instructor(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
        faculty_id: &FacultyId,
    ) -> PortResult<Course> {
        let collection = courses_path(department, partition);
        let claimed = sqlx::query_as::<_, DocumentRecord>(
            "UPDATE documents \
             SET body = jsonb_set(body, '{instructor}', to_jsonb($3::text)), version = version + 1, updated_at = now() \
             WHERE collection = $1 AND doc_id = $2 \
             AND (body->'instructor' IS NULL OR body->'instructor' = 'null'::jsonb) \
             RETURNING doc_id, body, version",
        )
        .bind(&collection)
        .bind(course_id.as_str())
        .bind(faculty_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        if let Some(record) = claimed {
            return record.to_domain();
        }

        // Either the course is missing or it already has an instructor.
        let current: Course = self.get_document(&collection, course_id.as_str()).await?.to_domain()?;
        let holder = current.instructor.map_or_else(String::new, |f| f.0);
        Err(PortError::Conflict(format!("Course {course_id} is already taught by {holder}")))
    }

    async fn put_course(&self, department: &str, course: &Course) -> PortResult<()> {
        self.put_document(&courses_path(department, course.partition), course.id.as_str(), course)
            .await
    }

    async fn put_student(&self, student: &Student) -> PortResult<()> {
        self.put_document(&students_path(student.partition), student.id.as_str(), student)
            .await
    }

    async fn put_faculty(&self, faculty: &Faculty) -> PortResult<()> {
        self.put_document(FACULTY, faculty.id.as_str(), faculty).await
    }
}

//=========================================================================================
// `ClearanceStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ClearanceStore for DbAdapter {
    async fn append_record(&self, record: &ClearanceRecord) -> PortResult<()> {
        sqlx::query("INSERT INTO documents (collection, doc_id, body, version) VALUES ($1, $2, $3, $4)")
            .bind(clearances_path(record.partition))
            .bind(record.id.to_string())
            .bind(to_json(record)?)
            .bind(record.version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    PortError::Conflict(format!("Clearance record {} already exists", record.id))
                }
                _ => unexpected(e),
            })?;
        Ok(())
    }

    async fn latest_record(&self, partition: Partition) -> PortResult<Option<ClearanceRecord>> {
        sqlx::query_as::<_, DocumentRecord>(
            "SELECT doc_id, body, version FROM documents WHERE collection = $1 \
             ORDER BY (body->>'generated_at')::timestamptz DESC, seq DESC LIMIT 1",
        )
        .bind(clearances_path(partition))
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(DocumentRecord::to_record)
        .transpose()
    }

    async fn get_record(&self, partition: Partition, record_id: RecordId) -> PortResult<ClearanceRecord> {
        self.get_document(&clearances_path(partition), &record_id.to_string())
            .await?
            .to_record()
    }

    async fn list_records(&self, partition: Partition) -> PortResult<Vec<ClearanceRecord>> {
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT doc_id, body, version FROM documents WHERE collection = $1 \
             ORDER BY (body->>'generated_at')::timestamptz DESC, seq DESC",
        )
        .bind(clearances_path(partition))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(DocumentRecord::to_record).collect()
    }

    async fn replace_students(
        &self,
        partition: Partition,
        record_id: RecordId,
        expected_version: u64,
        students: &[StudentClearance],
    ) -> PortResult<u64> {
        let collection = clearances_path(partition);
        let doc_id = record_id.to_string();

        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE documents \
             SET body = jsonb_set(body, '{students}', $4), version = version + 1, updated_at = now() \
             WHERE collection = $1 AND doc_id = $2 AND version = $3 \
             RETURNING version",
        )
        .bind(&collection)
        .bind(&doc_id)
        .bind(expected_version as i64)
        .bind(to_json(students)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        if let Some(version) = updated {
            return Ok(version as u64);
        }

        // Either the record is gone or someone else bumped the version first.
        let current = self.get_document(&collection, &doc_id).await?;
        Err(PortError::Conflict(format!(
            "Clearance record {record_id} is at version {}, expected {expected_version}",
            current.version
        )))
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for DbAdapter {
    async fn create_account(
        &self,
        email: &str,
        hashed_password: &str,
        faculty_id: Option<&FacultyId>,
        is_admin: bool,
    ) -> PortResult<StaffIdentity> {
        let record = sqlx::query_as::<_, IdentityRecord>(
            "INSERT INTO staff_accounts (user_id, email, hashed_password, faculty_id, is_admin) \
             VALUES ($1, $2, $3, $4, $5) RETURNING user_id, email, faculty_id, is_admin",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(hashed_password)
        .bind(faculty_id.map(FacultyId::as_str))
        .bind(is_admin)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PortError::Conflict(format!("Account {email} already exists"))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_account_by_email(&self, email: &str) -> PortResult<StaffCredentials> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT user_id, email, hashed_password, faculty_id, is_admin FROM staff_accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Account {email} not found")),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<StaffIdentity> {
        let record = sqlx::query_as::<_, IdentityRecord>(
            "SELECT a.user_id, a.email, a.faculty_id, a.is_admin \
             FROM auth_sessions s JOIN staff_accounts a ON a.user_id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or(PortError::Unauthorized)?;
        Ok(record.to_domain())
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nodues_core::domain::{Section, Year};
    use sqlx::postgres::PgPoolOptions;

    const DEPT: &str = "CSE (DS)";

    /// Connects to `DATABASE_URL`, migrates, and clears the partition's documents.
    async fn live_adapter(partition: Partition) -> DbAdapter {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to Postgres");
        let adapter = DbAdapter::new(pool);
        adapter.run_migrations().await.expect("run migrations");
        sqlx::query("DELETE FROM documents WHERE collection = ANY($1)")
            .bind(vec![
                clearances_path(partition),
                courses_path(DEPT, partition),
                students_path(partition),
            ])
            .execute(&adapter.pool)
            .await
            .expect("clear partition");
        adapter
    }

    fn record(partition: Partition, generated_at: DateTime<Utc>) -> ClearanceRecord {
        ClearanceRecord {
            id: Uuid::new_v4(),
            partition,
            generated_at,
            status: "Generated".into(),
            version: 0,
            students: Vec::new(),
        }
    }

    fn course(partition: Partition) -> Course {
        Course {
            id: CourseId::new("c1"),
            partition,
            code: "CS401".into(),
            name: "Distributed Systems".into(),
            instructor: None,
            students: Vec::new(),
        }
    }

    #[test]
    fn collection_paths_mirror_the_document_layout() {
        let p = Partition::new(Year::III, Section::A);
        assert_eq!(
            courses_path("CSE (DS)", p),
            "courses/CSE (DS)/years/III/sections/A/courseDetails"
        );
        assert_eq!(students_path(p), "students/III/A");
        assert_eq!(clearances_path(p), "noDues/III/A");
    }

    #[tokio::test]
    #[ignore = "needs a live Postgres at DATABASE_URL"]
    async fn replace_students_is_a_version_compare_and_swap() {
        let p = Partition::new(Year::IV, Section::C);
        let db = live_adapter(p).await;
        let rec = record(p, Utc::now());
        db.append_record(&rec).await.unwrap();

        assert_eq!(db.replace_students(p, rec.id, 0, &[]).await.unwrap(), 1);
        let stale = db.replace_students(p, rec.id, 0, &[]).await.unwrap_err();
        assert!(matches!(stale, PortError::Conflict(_)));
        assert_eq!(db.get_record(p, rec.id).await.unwrap().version, 1);

        let missing = db.replace_students(p, Uuid::new_v4(), 0, &[]).await.unwrap_err();
        assert!(matches!(missing, PortError::NotFound(_)));

        let dup = db.append_record(&rec).await.unwrap_err();
        assert!(matches!(dup, PortError::Conflict(_)));
    }

    #[tokio::test]
    #[ignore = "needs a live Postgres at DATABASE_URL"]
    async fn records_are_ordered_newest_first_with_insertion_breaking_ties() {
        let p = Partition::new(Year::IV, Section::D);
        let db = live_adapter(p).await;
        assert!(db.latest_record(p).await.unwrap().is_none());

        let now = Utc::now();
        let newest = record(p, now);
        let older = record(p, now - Duration::hours(1));
        let tied = record(p, now);
        db.append_record(&newest).await.unwrap();
        db.append_record(&older).await.unwrap();
        db.append_record(&tied).await.unwrap();

        assert_eq!(db.latest_record(p).await.unwrap().map(|r| r.id), Some(tied.id));
        let ids: Vec<Uuid> = db.list_records(p).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![tied.id, newest.id, older.id]);
    }

    #[tokio::test]
    #[ignore = "needs a live Postgres at DATABASE_URL"]
    async fn an_instructor_is_claimed_only_once() {
        let p = Partition::new(Year::IV, Section::B);
        let db = live_adapter(p).await;
        let c1 = CourseId::new("c1");

        let missing = db.claim_instructor(DEPT, p, &c1, &FacultyId::new("f1")).await.unwrap_err();
        assert!(matches!(missing, PortError::NotFound(_)));

        db.put_course(DEPT, &course(p)).await.unwrap();
        let claimed = db.claim_instructor(DEPT, p, &c1, &FacultyId::new("f1")).await.unwrap();
        assert_eq!(claimed.instructor, Some(FacultyId::new("f1")));

        let taken = db.claim_instructor(DEPT, p, &c1, &FacultyId::new("f2")).await.unwrap_err();
        assert!(matches!(taken, PortError::Conflict(_)));
        let stored = db.get_course(DEPT, p, &c1).await.unwrap();
        assert_eq!(stored.instructor, Some(FacultyId::new("f1")));
    }
}

//! crates/nodues_core/src/memory.rs
//!
//! An in-memory implementation of every port. It backs the unit and HTTP tests
//! and can simulate failing partitions to exercise graceful degradation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    ClearanceRecord, Course, CourseId, Faculty, FacultyId, Partition, RecordId, StaffCredentials,
    StaffIdentity, Student, StudentClearance,
};
use crate::ports::{AccountStore, ClearanceStore, PortError, PortResult, RosterStore};

struct StoredRecord {
    seq: u64,
    record: ClearanceRecord,
}

#[derive(Default)]
struct MemoryState {
    courses: HashMap<(String, Partition), Vec<Course>>,
    students: HashMap<Partition, Vec<Student>>,
    faculty: Vec<Faculty>,
    records: HashMap<Partition, Vec<StoredRecord>>,
    next_seq: u64,
    accounts: Vec<StaffCredentials>,
    sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    failing_partitions: HashSet<Partition>,
    failing_faculty: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every course and student fetch for `partition` fail.
    pub async fn fail_partition(&self, partition: Partition) {
        self.state.lock().await.failing_partitions.insert(partition);
    }

    pub async fn fail_faculty_directory(&self) {
        self.state.lock().await.failing_faculty = true;
    }

    pub async fn record_count(&self, partition: Partition) -> usize {
        self.state
            .lock()
            .await
            .records
            .get(&partition)
            .map_or(0, Vec::len)
    }

    fn sorted_records(state: &MemoryState, partition: Partition) -> Vec<ClearanceRecord> {
        let mut stored: Vec<&StoredRecord> = state
            .records
            .get(&partition)
            .map(|records| records.iter().collect())
            .unwrap_or_default();
        stored.sort_by(|a, b| {
            b.record
                .generated_at
                .cmp(&a.record.generated_at)
                .then(b.seq.cmp(&a.seq))
        });
        stored.into_iter().map(|s| s.record.clone()).collect()
    }
}

fn upsert<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &K) {
    match items.iter().position(|existing| key(existing) == key(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

#[async_trait]
impl RosterStore for InMemoryStore {
    async fn list_courses(&self, department: &str, partition: Partition) -> PortResult<Vec<Course>> {
        let state = self.state.lock().await;
        if state.failing_partitions.contains(&partition) {
            return Err(PortError::Unexpected(format!("courses of {partition} unavailable")));
        }
        Ok(state
            .courses
            .get(&(department.to_string(), partition))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_students(&self, partition: Partition) -> PortResult<Vec<Student>> {
        let state = self.state.lock().await;
        if state.failing_partitions.contains(&partition) {
            return Err(PortError::Unexpected(format!("students of {partition} unavailable")));
        }
        Ok(state.students.get(&partition).cloned().unwrap_or_default())
    }

    async fn list_faculty(&self) -> PortResult<Vec<Faculty>> {
        let state = self.state.lock().await;
        if state.failing_faculty {
            return Err(PortError::Unexpected("faculty directory unavailable".into()));
        }
        Ok(state.faculty.clone())
    }

    async fn get_course(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
    ) -> PortResult<Course> {
        self.state
            .lock()
            .await
            .courses
            .get(&(department.to_string(), partition))
            .and_then(|courses| courses.iter().find(|c| &c.id == course_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course {course_id} not found in {partition}")))
    }

    async fn get_faculty(&self, faculty_id: &FacultyId) -> PortResult<Faculty> {
        self.state
            .lock()
            .await
            .faculty
            .iter()
            .find(|f| &f.id == faculty_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Faculty {faculty_id} not found")))
    }

    async fn claim_instructor(
        &self,
        department: &str,
        partition: Partition,
        course_id: &CourseId,
        faculty_id: &FacultyId,
    ) -> PortResult<Course> {
        let mut state = self.state.lock().await;
        let course = state
            .courses
            .get_mut(&(department.to_string(), partition))
            .and_then(|courses| courses.iter_mut().find(|c| &c.id == course_id))
            .ok_or_else(|| PortError::NotFound(format!("Course {course_id} not found in {partition}")))?;
        if let Some(existing) = &course.instructor {
            return Err(PortError::Conflict(format!(
                "Course {course_id} is already taught by {existing}"
            )));
        }
        course.instructor = Some(faculty_id.clone());
        Ok(course.clone())
    }

    async fn put_course(&self, department: &str, course: &Course) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let courses = state
            .courses
            .entry((department.to_string(), course.partition))
            .or_default();
        upsert(courses, course.clone(), |c| &c.id);
        Ok(())
    }

    async fn put_student(&self, student: &Student) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let students = state.students.entry(student.partition).or_default();
        upsert(students, student.clone(), |s| &s.id);
        Ok(())
    }

    async fn put_faculty(&self, faculty: &Faculty) -> PortResult<()> {
        let mut state = self.state.lock().await;
        upsert(&mut state.faculty, faculty.clone(), |f| &f.id);
        Ok(())
    }
}

#[async_trait]
impl ClearanceStore for InMemoryStore {
    async fn append_record(&self, record: &ClearanceRecord) -> PortResult<()> {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        state
            .records
            .entry(record.partition)
            .or_default()
            .push(StoredRecord {
                seq,
                record: record.clone(),
            });
        Ok(())
    }

    async fn latest_record(&self, partition: Partition) -> PortResult<Option<ClearanceRecord>> {
        let state = self.state.lock().await;
        Ok(Self::sorted_records(&state, partition).into_iter().next())
    }

    async fn get_record(&self, partition: Partition, record_id: RecordId) -> PortResult<ClearanceRecord> {
        self.state
            .lock()
            .await
            .records
            .get(&partition)
            .and_then(|records| records.iter().find(|s| s.record.id == record_id))
            .map(|s| s.record.clone())
            .ok_or_else(|| PortError::NotFound(format!("Clearance record {record_id} not found")))
    }

    async fn list_records(&self, partition: Partition) -> PortResult<Vec<ClearanceRecord>> {
        let state = self.state.lock().await;
        Ok(Self::sorted_records(&state, partition))
    }

    async fn replace_students(
        &self,
        partition: Partition,
        record_id: RecordId,
        expected_version: u64,
        students: &[StudentClearance],
    ) -> PortResult<u64> {
        let mut state = self.state.lock().await;
        let stored = state
            .records
            .get_mut(&partition)
            .and_then(|records| records.iter_mut().find(|s| s.record.id == record_id))
            .ok_or_else(|| PortError::NotFound(format!("Clearance record {record_id} not found")))?;
        if stored.record.version != expected_version {
            return Err(PortError::Conflict(format!(
                "record {record_id} is at version {}, expected {expected_version}",
                stored.record.version
            )));
        }
        stored.record.students = students.to_vec();
        stored.record.version += 1;
        Ok(stored.record.version)
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn create_account(
        &self,
        email: &str,
        hashed_password: &str,
        faculty_id: Option<&FacultyId>,
        is_admin: bool,
    ) -> PortResult<StaffIdentity> {
        let mut state = self.state.lock().await;
        if state.accounts.iter().any(|a| a.identity.email == email) {
            return Err(PortError::Conflict(format!("account {email} already exists")));
        }
        let identity = StaffIdentity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            faculty_id: faculty_id.cloned(),
            is_admin,
        };
        state.accounts.push(StaffCredentials {
            identity: identity.clone(),
            hashed_password: hashed_password.to_string(),
        });
        Ok(identity)
    }

    async fn get_account_by_email(&self, email: &str) -> PortResult<StaffCredentials> {
        self.state
            .lock()
            .await
            .accounts
            .iter()
            .find(|a| a.identity.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Account {email} not found")))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.state
            .lock()
            .await
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<StaffIdentity> {
        let state = self.state.lock().await;
        let (user_id, expires_at) = state
            .sessions
            .get(session_id)
            .copied()
            .ok_or(PortError::Unauthorized)?;
        if expires_at <= Utc::now() {
            return Err(PortError::Unauthorized);
        }
        state
            .accounts
            .iter()
            .find(|a| a.identity.user_id == user_id)
            .map(|a| a.identity.clone())
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.lock().await.sessions.remove(session_id);
        Ok(())
    }
}

//! crates/nodues_core/src/tracker.rs
//!
//! The Clearance Status Tracker: reads the latest record of a partition and
//! moves individual approval entries from Pending to Accepted or Rejected.
//!
//! Status writes are compare-and-swap on the record version. On a conflict the
//! tracker re-reads the record and re-applies the same transition, so two staff
//! members signing off different entries never overwrite each other.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    ClearanceRecord, ClearanceStatus, CourseId, FacultyId, Partition, RecordId, RecordSummary,
    StaffIdentity, StudentClearance, StudentId,
};
use crate::error::{ClearanceError, ClearanceResult};
use crate::ports::{with_timeout, ClearanceStore, PortError, RosterStore};
use crate::view::{ClearanceQuery, ClearanceView, DisplayNames, PartyKind};

//=========================================================================================
// Requests and Outcomes
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TransitionRequest {
    pub student_id: StudentId,
    pub party_kind: PartyKind,
    /// Course id for course entries, faculty id for coordinator and mentor entries.
    pub party_id: String,
    pub status: ClearanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TransitionOutcome {
    pub record_id: Uuid,
    pub version: u64,
    pub student: StudentClearance,
}

//=========================================================================================
// Pure Transition Logic
//=========================================================================================

/// Applies one transition to the in-memory student list.
pub fn apply_transition(
    students: &mut [StudentClearance],
    actor: &StaffIdentity,
    request: &TransitionRequest,
) -> ClearanceResult<()> {
    if !request.status.is_terminal() {
        return Err(ClearanceError::Validation(format!(
            "an entry can only be moved to Accepted or Rejected, not {}",
            request.status
        )));
    }

    let student = students
        .iter_mut()
        .find(|s| s.student_id == request.student_id)
        .ok_or_else(|| {
            ClearanceError::NotFound(format!("student {} is not part of this clearance", request.student_id))
        })?;

    authorize(student, actor, request)?;

    let status = entry_status_mut(student, request.party_kind, &request.party_id).ok_or_else(|| {
        ClearanceError::NotFound(format!(
            "student {} has no {:?} entry for {}",
            request.student_id, request.party_kind, request.party_id
        ))
    })?;

    if status.is_terminal() {
        return Err(ClearanceError::InvalidTransition {
            from: *status,
            to: request.status,
        });
    }
    *status = request.status;
    Ok(())
}

fn entry_status_mut<'a>(
    student: &'a mut StudentClearance,
    kind: PartyKind,
    party_id: &str,
) -> Option<&'a mut ClearanceStatus> {
    match kind {
        PartyKind::Course => student
            .courses
            .iter_mut()
            .find(|c| c.course_id.as_str() == party_id)
            .map(|c| &mut c.status),
        PartyKind::CourseFaculty => student
            .courses_faculty
            .iter_mut()
            .find(|c| c.course_id.as_str() == party_id)
            .map(|c| &mut c.status),
        PartyKind::Coordinator => student
            .coordinators
            .iter_mut()
            .find(|c| c.faculty_id.as_str() == party_id)
            .map(|c| &mut c.status),
        PartyKind::Mentor => student
            .mentors
            .iter_mut()
            .find(|m| m.faculty_id.as_str() == party_id)
            .map(|m| &mut m.status),
    }
}

/// Admins may sign off anything. Faculty sign off their own coordinator and
/// mentor entries and the course entries of courses they instruct. A course
/// without an instructor falls back to the student's coordinators.
fn authorize(
    student: &StudentClearance,
    actor: &StaffIdentity,
    request: &TransitionRequest,
) -> ClearanceResult<()> {
    if actor.is_admin {
        return Ok(());
    }
    let Some(faculty_id) = actor.faculty_id.as_ref() else {
        return Err(ClearanceError::Forbidden(format!(
            "{} is not linked to a faculty member",
            actor.email
        )));
    };

    let allowed = match request.party_kind {
        PartyKind::Coordinator | PartyKind::Mentor => faculty_id.as_str() == request.party_id,
        PartyKind::Course | PartyKind::CourseFaculty => {
            course_authority(student, &CourseId::new(request.party_id.as_str()), faculty_id)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(ClearanceError::Forbidden(format!(
            "{faculty_id} cannot sign off {:?} entry {} for student {}",
            request.party_kind, request.party_id, student.student_id
        )))
    }
}

fn course_authority(student: &StudentClearance, course_id: &CourseId, faculty_id: &FacultyId) -> bool {
    match student.courses_faculty.iter().find(|c| &c.course_id == course_id) {
        Some(entry) => match entry.faculty_id.as_ref() {
            Some(instructor) => instructor == faculty_id,
            None => student.coordinators.iter().any(|c| &c.faculty_id == faculty_id),
        },
        None => false,
    }
}

//=========================================================================================
// Tracker Service
//=========================================================================================

pub struct ClearanceTracker {
    roster: Arc<dyn RosterStore>,
    clearances: Arc<dyn ClearanceStore>,
    department: String,
    timeout: Duration,
    max_attempts: u32,
}

impl ClearanceTracker {
    pub fn new(
        roster: Arc<dyn RosterStore>,
        clearances: Arc<dyn ClearanceStore>,
        department: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            roster,
            clearances,
            department: department.into(),
            timeout,
            max_attempts: 3,
        }
    }

    /// How many times a conflicting status write is re-applied before giving up.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub async fn load_latest(&self, partition: Partition) -> ClearanceResult<ClearanceRecord> {
        with_timeout(self.timeout, self.clearances.latest_record(partition))
            .await?
            .ok_or_else(|| {
                ClearanceError::NotFound(format!("no clearance has been generated for {partition} yet"))
            })
    }

    /// The latest record with display names, filtered and sorted for display.
    pub async fn load_view(
        &self,
        partition: Partition,
        query: &ClearanceQuery,
    ) -> ClearanceResult<ClearanceView> {
        let record = self.load_latest(partition).await?;
        let names = self.display_names(partition).await;
        Ok(ClearanceView::build(&record, &names, query))
    }

    /// Every generated record of the partition, newest first.
    pub async fn history(&self, partition: Partition) -> ClearanceResult<Vec<RecordSummary>> {
        let records = with_timeout(self.timeout, self.clearances.list_records(partition)).await?;
        Ok(records.iter().map(ClearanceRecord::summary).collect())
    }

    pub async fn transition_status(
        &self,
        actor: &StaffIdentity,
        partition: Partition,
        record_id: RecordId,
        request: &TransitionRequest,
    ) -> ClearanceResult<TransitionOutcome> {
        for attempt in 1..=self.max_attempts {
            let mut record = self.current_record(partition, record_id).await?;
            apply_transition(&mut record.students, actor, request)?;

            let write = self.clearances.replace_students(
                partition,
                record_id,
                record.version,
                &record.students,
            );
            match with_timeout(self.timeout, write).await {
                Ok(version) => {
                    info!(
                        %record_id,
                        student = %request.student_id,
                        kind = ?request.party_kind,
                        party = %request.party_id,
                        status = %request.status,
                        "Clearance entry updated by {}",
                        actor.email
                    );
                    let student = record
                        .student(&request.student_id)
                        .cloned()
                        .ok_or_else(|| ClearanceError::NotFound(request.student_id.to_string()))?;
                    return Ok(TransitionOutcome {
                        record_id,
                        version,
                        student,
                    });
                }
                Err(PortError::Conflict(reason)) => {
                    warn!(%record_id, attempt, "Concurrent clearance write, re-applying: {}", reason);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ClearanceError::WriteConflict(format!(
            "record {record_id} kept changing; gave up after {} attempts",
            self.max_attempts
        )))
    }

    /// Reads `record_id` only while it is still the partition's latest record.
    /// Writes to a superseded record would never show up in the view.
    async fn current_record(
        &self,
        partition: Partition,
        record_id: RecordId,
    ) -> ClearanceResult<ClearanceRecord> {
        let latest = with_timeout(self.timeout, self.clearances.latest_record(partition)).await?;
        match latest {
            Some(latest) if latest.id == record_id => Ok(latest),
            latest => {
                // Unknown ids stay NotFound; known but older ones are stale.
                with_timeout(self.timeout, self.clearances.get_record(partition, record_id)).await?;
                let newer = latest.map_or_else(|| "a newer record".to_string(), |r| r.id.to_string());
                Err(ClearanceError::WriteConflict(format!(
                    "record {record_id} has been superseded by {newer}; reload the latest clearance"
                )))
            }
        }
    }

    /// One directory fetch plus the partition's courses. A failed fetch only
    /// costs the names, never the view.
    async fn display_names(&self, partition: Partition) -> DisplayNames {
        let (courses, faculty) = futures::join!(
            with_timeout(self.timeout, self.roster.list_courses(&self.department, partition)),
            with_timeout(self.timeout, self.roster.list_faculty()),
        );
        let courses = courses.unwrap_or_else(|e| {
            warn!("Course names for {} unavailable: {}", partition, e);
            Vec::new()
        });
        let faculty = faculty.unwrap_or_else(|e| {
            warn!("Faculty directory unavailable: {}", e);
            Vec::new()
        });
        DisplayNames::new(&courses, &faculty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Course, Faculty, RoleSet, Section, Student, Year};
    use crate::generator::{ClearanceGenerator, ClearanceSelection};
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    const DEPT: &str = "CSE (DS)";

    fn iii_a() -> Partition {
        Partition::new(Year::III, Section::A)
    }

    fn admin() -> StaffIdentity {
        StaffIdentity {
            user_id: Uuid::new_v4(),
            email: "office@college.edu".into(),
            faculty_id: None,
            is_admin: true,
        }
    }

    fn faculty_actor(id: &str) -> StaffIdentity {
        StaffIdentity {
            user_id: Uuid::new_v4(),
            email: format!("{id}@college.edu"),
            faculty_id: Some(FacultyId::new(id)),
            is_admin: false,
        }
    }

    fn request(student: &str, kind: PartyKind, party: &str, status: ClearanceStatus) -> TransitionRequest {
        TransitionRequest {
            student_id: StudentId::new(student),
            party_kind: kind,
            party_id: party.into(),
            status,
        }
    }

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for (id, instructor) in [("c1", Some("f5")), ("c2", None)] {
            store
                .put_course(
                    DEPT,
                    &Course {
                        id: CourseId::new(id),
                        partition: iii_a(),
                        code: id.to_uppercase(),
                        name: format!("Course {id}"),
                        instructor: instructor.map(FacultyId::new),
                        students: Vec::new(),
                    },
                )
                .await
                .unwrap();
        }
        for (id, roll) in [("s1", "21CS02"), ("s2", "21CS01")] {
            store
                .put_student(&Student {
                    id: StudentId::new(id),
                    roll_no: roll.into(),
                    name: format!("Student {id}"),
                    partition: iii_a(),
                    courses: vec![CourseId::new("c1"), CourseId::new("c2")],
                    mentor: Some(FacultyId::new("f9")),
                })
                .await
                .unwrap();
        }
        for (id, name) in [("f1", "Dr. Iyer"), ("f5", "Dr. Rao"), ("f9", "Dr. Sen")] {
            store
                .put_faculty(&Faculty {
                    id: FacultyId::new(id),
                    name: name.into(),
                    designation: None,
                    roles: RoleSet::default(),
                })
                .await
                .unwrap();
        }
        store
    }

    fn selection() -> ClearanceSelection {
        ClearanceSelection {
            year: Some(Year::III),
            section: Some(Section::A),
            courses: vec![CourseId::new("c1"), CourseId::new("c2")],
            coordinators: vec![FacultyId::new("f1")],
            mentors: vec![FacultyId::new("f9")],
        }
    }

    async fn generate(store: &Arc<InMemoryStore>) -> ClearanceRecord {
        ClearanceGenerator::new(store.clone(), store.clone(), DEPT, Duration::from_secs(1))
            .generate(&selection())
            .await
            .unwrap()
    }

    fn tracker(store: &Arc<InMemoryStore>) -> ClearanceTracker {
        ClearanceTracker::new(store.clone(), store.clone(), DEPT, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn load_latest_on_an_empty_partition_is_not_found() {
        let store = seeded().await;
        let err = tracker(&store)
            .load_latest(Partition::new(Year::II, Section::B))
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn load_latest_is_repeatable_and_returns_the_newest_record() {
        let store = seeded().await;
        let first = generate(&store).await;
        let second = generate(&store).await;
        let tracker = tracker(&store);

        let a = tracker.load_latest(iii_a()).await.unwrap();
        let b = tracker.load_latest(iii_a()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, second.id);
        assert_ne!(a.id, first.id);

        let history = tracker.history(iii_a()).await.unwrap();
        let ids: Vec<_> = history.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn view_is_enriched_and_sorted_by_roll() {
        let store = seeded().await;
        generate(&store).await;

        let view = tracker(&store)
            .load_view(iii_a(), &ClearanceQuery::default())
            .await
            .unwrap();
        assert_eq!(view.total_students, 2);
        let rolls: Vec<_> = view.students.iter().map(|s| s.roll_no.as_str()).collect();
        assert_eq!(rolls, vec!["21CS01", "21CS02"]);
        let labels: Vec<_> = view.students[0].approvals.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Course c1", "Course c2", "Course c1", "Course c2", "Dr. Iyer", "Dr. Sen"]
        );
    }

    #[tokio::test]
    async fn instructor_accepts_their_own_course() {
        let store = seeded().await;
        let record = generate(&store).await;

        let outcome = tracker(&store)
            .transition_status(
                &faculty_actor("f5"),
                iii_a(),
                record.id,
                &request("s1", PartyKind::CourseFaculty, "c1", ClearanceStatus::Accepted),
            )
            .await
            .unwrap();

        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.student.courses_faculty[0].status, ClearanceStatus::Accepted);
        // Nothing else moved.
        assert_eq!(outcome.student.courses[0].status, ClearanceStatus::Pending);
        let stored = tracker(&store).load_latest(iii_a()).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.student(&StudentId::new("s2")).unwrap().courses_faculty[0].status, ClearanceStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_entries_cannot_move_again() {
        let store = seeded().await;
        let record = generate(&store).await;
        let tracker = tracker(&store);
        let req = request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Rejected);

        tracker
            .transition_status(&admin(), iii_a(), record.id, &req)
            .await
            .unwrap();
        let err = tracker
            .transition_status(
                &admin(),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClearanceError::InvalidTransition {
                from: ClearanceStatus::Rejected,
                to: ClearanceStatus::Accepted
            }
        ));
    }

    #[tokio::test]
    async fn pending_is_not_a_valid_target() {
        let store = seeded().await;
        let record = generate(&store).await;
        let err = tracker(&store)
            .transition_status(
                &admin(),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Coordinator, "f1", ClearanceStatus::Pending),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Validation(_)));
    }

    #[tokio::test]
    async fn faculty_cannot_sign_off_someone_elses_entry() {
        let store = seeded().await;
        let record = generate(&store).await;
        let err = tracker(&store)
            .transition_status(
                &faculty_actor("f9"),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Coordinator, "f1", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn coordinators_stand_in_for_a_missing_instructor() {
        let store = seeded().await;
        let record = generate(&store).await;
        let tracker = tracker(&store);

        let outcome = tracker
            .transition_status(
                &faculty_actor("f1"),
                iii_a(),
                record.id,
                &request("s1", PartyKind::CourseFaculty, "c2", ClearanceStatus::Accepted),
            )
            .await
            .unwrap();
        assert_eq!(outcome.student.courses_faculty[1].faculty_id, None);
        assert_eq!(outcome.student.courses_faculty[1].status, ClearanceStatus::Accepted);

        // A course with an instructor is not theirs to sign.
        let err = tracker
            .transition_status(
                &faculty_actor("f1"),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Course, "c1", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unknown_entries_are_not_found() {
        let store = seeded().await;
        let record = generate(&store).await;
        let tracker = tracker(&store);

        let missing_student = tracker
            .transition_status(
                &admin(),
                iii_a(),
                record.id,
                &request("s404", PartyKind::Mentor, "f9", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing_student, ClearanceError::NotFound(_)));

        let missing_record = tracker
            .transition_status(
                &admin(),
                iii_a(),
                Uuid::new_v4(),
                &request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing_record, ClearanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn superseded_records_refuse_transitions() {
        let store = seeded().await;
        let old = generate(&store).await;
        let new = generate(&store).await;
        let tracker = tracker(&store);

        let err = tracker
            .transition_status(
                &admin(),
                iii_a(),
                old.id,
                &request("s1", PartyKind::Coordinator, "f1", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(&err, ClearanceError::WriteConflict(msg) if msg.contains(&new.id.to_string())));

        let untouched = store.get_record(iii_a(), old.id).await.unwrap();
        assert_eq!(untouched.version, 0);

        let outcome = tracker
            .transition_status(
                &admin(),
                iii_a(),
                new.id,
                &request("s1", PartyKind::Coordinator, "f1", ClearanceStatus::Accepted),
            )
            .await
            .unwrap();
        let latest = tracker.load_latest(iii_a()).await.unwrap();
        assert_eq!(latest.version, outcome.version);
        assert_eq!(
            latest.student(&StudentId::new("s1")).unwrap().coordinators[0].status,
            ClearanceStatus::Accepted
        );
    }

    /// Lets another writer land a transition between our read and our write, once.
    struct RacingStore {
        inner: Arc<InMemoryStore>,
        raced: AtomicBool,
        rival: TransitionRequest,
    }

    #[async_trait]
    impl ClearanceStore for RacingStore {
        async fn append_record(&self, record: &ClearanceRecord) -> crate::ports::PortResult<()> {
            self.inner.append_record(record).await
        }

        async fn latest_record(&self, partition: Partition) -> crate::ports::PortResult<Option<ClearanceRecord>> {
            self.inner.latest_record(partition).await
        }

        async fn get_record(&self, partition: Partition, record_id: RecordId) -> crate::ports::PortResult<ClearanceRecord> {
            self.inner.get_record(partition, record_id).await
        }

        async fn list_records(&self, partition: Partition) -> crate::ports::PortResult<Vec<ClearanceRecord>> {
            self.inner.list_records(partition).await
        }

        async fn replace_students(
            &self,
            partition: Partition,
            record_id: RecordId,
            expected_version: u64,
            students: &[StudentClearance],
        ) -> crate::ports::PortResult<u64> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut rival = self.inner.get_record(partition, record_id).await?;
                apply_transition(&mut rival.students, &admin(), &self.rival)
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
                self.inner
                    .replace_students(partition, record_id, rival.version, &rival.students)
                    .await?;
            }
            self.inner
                .replace_students(partition, record_id, expected_version, students)
                .await
        }
    }

    #[tokio::test]
    async fn concurrent_disjoint_transitions_both_survive() {
        let store = seeded().await;
        let record = generate(&store).await;
        let racing = Arc::new(RacingStore {
            inner: store.clone(),
            raced: AtomicBool::new(false),
            rival: request("s2", PartyKind::Mentor, "f9", ClearanceStatus::Rejected),
        });
        let tracker = ClearanceTracker::new(store.clone(), racing, DEPT, Duration::from_secs(1));

        let outcome = tracker
            .transition_status(
                &admin(),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Accepted),
            )
            .await
            .unwrap();
        assert_eq!(outcome.version, 2);

        let stored = store.get_record(iii_a(), record.id).await.unwrap();
        assert_eq!(stored.student(&StudentId::new("s1")).unwrap().mentors[0].status, ClearanceStatus::Accepted);
        assert_eq!(stored.student(&StudentId::new("s2")).unwrap().mentors[0].status, ClearanceStatus::Rejected);
    }

    #[tokio::test]
    async fn a_racing_write_to_the_same_entry_wins_cleanly() {
        let store = seeded().await;
        let record = generate(&store).await;
        let racing = Arc::new(RacingStore {
            inner: store.clone(),
            raced: AtomicBool::new(false),
            rival: request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Rejected),
        });
        let tracker = ClearanceTracker::new(store.clone(), racing, DEPT, Duration::from_secs(1));

        let err = tracker
            .transition_status(
                &admin(),
                iii_a(),
                record.id,
                &request("s1", PartyKind::Mentor, "f9", ClearanceStatus::Accepted),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::InvalidTransition { .. }));
    }
}

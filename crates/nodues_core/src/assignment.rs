//! crates/nodues_core/src/assignment.rs
//!
//! Relationship workflows that feed the clearance data: course instructors,
//! student mentors, and coordinator tags on faculty.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::domain::{
    CoordinatorRole, Course, CourseId, Faculty, FacultyId, InstructorRole, MentorRole, Partition,
    Student, StudentId,
};
use crate::error::{ClearanceError, ClearanceResult};
use crate::ports::{with_timeout, PortError, RosterStore};

pub struct AssignmentService {
    store: Arc<dyn RosterStore>,
    department: String,
    timeout: Duration,
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

impl AssignmentService {
    pub fn new(store: Arc<dyn RosterStore>, department: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            department: department.into(),
            timeout,
        }
    }

    async fn course(&self, partition: Partition, course_id: &CourseId) -> ClearanceResult<Course> {
        Ok(with_timeout(
            self.timeout,
            self.store.get_course(&self.department, partition, course_id),
        )
        .await?)
    }

    async fn faculty(&self, faculty_id: &FacultyId) -> ClearanceResult<Faculty> {
        Ok(with_timeout(self.timeout, self.store.get_faculty(faculty_id)).await?)
    }

    async fn students(&self, partition: Partition) -> ClearanceResult<Vec<Student>> {
        Ok(with_timeout(self.timeout, self.store.list_students(partition)).await?)
    }

    async fn save_student(&self, student: &Student) -> ClearanceResult<()> {
        Ok(with_timeout(self.timeout, self.store.put_student(student)).await?)
    }

    async fn save_faculty(&self, faculty: &Faculty) -> ClearanceResult<()> {
        Ok(with_timeout(self.timeout, self.store.put_faculty(faculty)).await?)
    }

    async fn save_course(&self, course: &Course) -> ClearanceResult<()> {
        Ok(with_timeout(self.timeout, self.store.put_course(&self.department, course)).await?)
    }

    /// Makes `faculty_id` the instructor of the course and enrols the whole
    /// partition. Refuses to replace an existing instructor: the course is
    /// claimed atomically first, and released again if the linking fails.
    pub async fn assign_instructor(
        &self,
        partition: Partition,
        course_id: &CourseId,
        faculty_id: &FacultyId,
    ) -> ClearanceResult<Course> {
        let faculty = self.faculty(faculty_id).await?;
        let claim = self
            .store
            .claim_instructor(&self.department, partition, course_id, faculty_id);
        let mut course = match with_timeout(self.timeout, claim).await {
            Ok(course) => course,
            Err(PortError::Conflict(reason)) => {
                return Err(ClearanceError::AlreadyAssigned(format!("{reason}; unassign it first")))
            }
            Err(e) => return Err(e.into()),
        };
        let claimed = course.clone();

        let mut enrolled = Vec::new();
        let mut linked = faculty.clone();
        if let Err(e) = self
            .link_instructor(partition, &mut course, &mut linked, &mut enrolled)
            .await
        {
            error!(course = %course_id, faculty = %faculty_id, "Instructor assignment failed, releasing the course: {}", e);
            if let Err(release) = self.release_claim(claimed, &faculty, enrolled).await {
                error!(course = %course_id, "Could not release the course: {}", release);
            }
            return Err(e);
        }

        info!(course = %course_id, faculty = %faculty_id, "Instructor assigned in {}", partition);
        Ok(course)
    }

    async fn link_instructor(
        &self,
        partition: Partition,
        course: &mut Course,
        faculty: &mut Faculty,
        enrolled: &mut Vec<Student>,
    ) -> ClearanceResult<()> {
        let students = self.students(partition).await?;
        for mut student in students.iter().cloned() {
            if !student.courses.contains(&course.id) {
                student.courses.push(course.id.clone());
                self.save_student(&student).await?;
                enrolled.push(student);
            }
        }

        let role = faculty.roles.instructor.get_or_insert_with(InstructorRole::default);
        push_unique(&mut role.courses, course.id.clone());
        self.save_faculty(faculty).await?;

        course.students = students.iter().map(|s| s.id.clone()).collect();
        self.save_course(course).await
    }

    /// Puts back what `link_instructor` managed to write before it failed.
    async fn release_claim(
        &self,
        mut course: Course,
        faculty: &Faculty,
        enrolled: Vec<Student>,
    ) -> ClearanceResult<()> {
        for mut student in enrolled {
            student.courses.retain(|c| c != &course.id);
            self.save_student(&student).await?;
        }
        self.save_faculty(faculty).await?;
        course.instructor = None;
        self.save_course(&course).await
    }

    /// Undoes `assign_instructor`: the course loses its instructor and every
    /// student of the partition drops the course.
    pub async fn unassign_instructor(
        &self,
        partition: Partition,
        course_id: &CourseId,
    ) -> ClearanceResult<Course> {
        let mut course = self.course(partition, course_id).await?;
        let Some(instructor) = course.instructor.take() else {
            return Err(ClearanceError::Validation(format!(
                "course {course_id} has no instructor to unassign"
            )));
        };

        match self.faculty(&instructor).await {
            Ok(mut faculty) => {
                if let Some(role) = faculty.roles.instructor.as_mut() {
                    role.courses.retain(|c| c != course_id);
                }
                self.save_faculty(&faculty).await?;
            }
            // The course is still released if the faculty document is gone.
            Err(ClearanceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        for mut student in self.students(partition).await? {
            if student.courses.contains(course_id) {
                student.courses.retain(|c| c != course_id);
                self.save_student(&student).await?;
            }
        }

        course.students.clear();
        self.save_course(&course).await?;
        info!(course = %course_id, faculty = %instructor, "Instructor unassigned in {}", partition);
        Ok(course)
    }

    /// Assigns `faculty_id` as mentor of the first `count` students of the
    /// partition without one, in roll-number order. Returns the students assigned.
    pub async fn assign_mentor(
        &self,
        partition: Partition,
        faculty_id: &FacultyId,
        count: usize,
    ) -> ClearanceResult<Vec<StudentId>> {
        if count == 0 {
            return Err(ClearanceError::Validation(
                "choose at least one student to assign".into(),
            ));
        }
        let mut faculty = self.faculty(faculty_id).await?;
        let mut available: Vec<Student> = self
            .students(partition)
            .await?
            .into_iter()
            .filter(|s| s.mentor.is_none())
            .collect();
        if count > available.len() {
            return Err(ClearanceError::Validation(format!(
                "only {} students in {partition} are without a mentor",
                available.len()
            )));
        }
        available.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));

        let mut assigned = Vec::with_capacity(count);
        for mut student in available.into_iter().take(count) {
            student.mentor = Some(faculty_id.clone());
            self.save_student(&student).await?;
            assigned.push(student.id);
        }

        let role = faculty.roles.mentor.get_or_insert_with(MentorRole::default);
        for id in &assigned {
            push_unique(&mut role.students, id.clone());
        }
        self.save_faculty(&faculty).await?;

        info!(faculty = %faculty_id, students = assigned.len(), "Mentor assigned in {}", partition);
        Ok(assigned)
    }

    /// Clears the mentor of each listed student. Returns how many changed.
    pub async fn remove_mentors(
        &self,
        partition: Partition,
        student_ids: &[StudentId],
    ) -> ClearanceResult<usize> {
        if student_ids.is_empty() {
            return Err(ClearanceError::Validation("no students selected".into()));
        }

        let mut released: Vec<(FacultyId, StudentId)> = Vec::new();
        for mut student in self.students(partition).await? {
            if !student_ids.contains(&student.id) {
                continue;
            }
            if let Some(mentor) = student.mentor.take() {
                self.save_student(&student).await?;
                released.push((mentor, student.id));
            }
        }

        let mut mentors: Vec<&FacultyId> = released.iter().map(|(f, _)| f).collect();
        mentors.sort();
        mentors.dedup();
        for mentor in mentors {
            let mut faculty = match self.faculty(mentor).await {
                Ok(faculty) => faculty,
                Err(ClearanceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if let Some(role) = faculty.roles.mentor.as_mut() {
                role.students
                    .retain(|s| !released.iter().any(|(f, id)| f == mentor && id == s));
            }
            self.save_faculty(&faculty).await?;
        }

        info!(students = released.len(), "Mentors removed in {}", partition);
        Ok(released.len())
    }

    /// Tags a faculty member with a coordinator category.
    pub async fn set_coordinator(
        &self,
        faculty_id: &FacultyId,
        category: &str,
    ) -> ClearanceResult<Faculty> {
        let category = category.trim();
        if category.is_empty() {
            return Err(ClearanceError::Validation("coordinator category is required".into()));
        }
        let mut faculty = self.faculty(faculty_id).await?;
        faculty.roles.coordinator = Some(CoordinatorRole {
            category: category.to_string(),
        });
        self.save_faculty(&faculty).await?;
        info!(faculty = %faculty_id, category, "Coordinator role updated");
        Ok(faculty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoleSet, Section, Year};
    use crate::memory::InMemoryStore;

    const DEPT: &str = "CSE (DS)";

    fn iii_a() -> Partition {
        Partition::new(Year::III, Section::A)
    }

    async fn seeded() -> (Arc<InMemoryStore>, AssignmentService) {
        let store = Arc::new(InMemoryStore::new());
        store
            .put_course(
                DEPT,
                &Course {
                    id: CourseId::new("c1"),
                    partition: iii_a(),
                    code: "CS301".into(),
                    name: "Compilers".into(),
                    instructor: None,
                    students: Vec::new(),
                },
            )
            .await
            .unwrap();
        for (id, roll) in [("s1", "21CS03"), ("s2", "21CS01"), ("s3", "21CS02")] {
            store
                .put_student(&Student {
                    id: StudentId::new(id),
                    roll_no: roll.into(),
                    name: format!("Student {id}"),
                    partition: iii_a(),
                    courses: Vec::new(),
                    mentor: None,
                })
                .await
                .unwrap();
        }
        for id in ["f1", "f2"] {
            store
                .put_faculty(&Faculty {
                    id: FacultyId::new(id),
                    name: format!("Prof {id}"),
                    designation: Some("Assistant Professor".into()),
                    roles: RoleSet::default(),
                })
                .await
                .unwrap();
        }
        let service = AssignmentService::new(store.clone(), DEPT, Duration::from_secs(1));
        (store, service)
    }

    #[tokio::test]
    async fn assigning_an_instructor_links_course_faculty_and_students() {
        let (store, service) = seeded().await;
        let course = service
            .assign_instructor(iii_a(), &CourseId::new("c1"), &FacultyId::new("f1"))
            .await
            .unwrap();

        assert_eq!(course.instructor, Some(FacultyId::new("f1")));
        assert_eq!(course.students.len(), 3);
        let faculty = store.get_faculty(&FacultyId::new("f1")).await.unwrap();
        assert!(faculty.teaches(&CourseId::new("c1")));
        let students = store.list_students(iii_a()).await.unwrap();
        assert!(students.iter().all(|s| s.courses == vec![CourseId::new("c1")]));
    }

    #[tokio::test]
    async fn an_assigned_course_is_never_overwritten() {
        let (store, service) = seeded().await;
        let c1 = CourseId::new("c1");
        service.assign_instructor(iii_a(), &c1, &FacultyId::new("f1")).await.unwrap();

        let err = service
            .assign_instructor(iii_a(), &c1, &FacultyId::new("f2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::AlreadyAssigned(_)));
        let course = store.get_course(DEPT, iii_a(), &c1).await.unwrap();
        assert_eq!(course.instructor, Some(FacultyId::new("f1")));

        service.unassign_instructor(iii_a(), &c1).await.unwrap();
        let course = service
            .assign_instructor(iii_a(), &c1, &FacultyId::new("f2"))
            .await
            .unwrap();
        assert_eq!(course.instructor, Some(FacultyId::new("f2")));
        let f1 = store.get_faculty(&FacultyId::new("f1")).await.unwrap();
        assert!(!f1.teaches(&c1));
    }

    #[tokio::test]
    async fn concurrent_assignments_claim_the_course_once() {
        let (store, service) = seeded().await;
        let c1 = CourseId::new("c1");
        let (f1, f2) = (FacultyId::new("f1"), FacultyId::new("f2"));

        let (first, second) = tokio::join!(
            service.assign_instructor(iii_a(), &c1, &f1),
            service.assign_instructor(iii_a(), &c1, &f2),
        );
        let winner = match (first, second) {
            (Ok(course), Err(ClearanceError::AlreadyAssigned(_)))
            | (Err(ClearanceError::AlreadyAssigned(_)), Ok(course)) => course.instructor,
            other => panic!("expected exactly one assignment to win, got {other:?}"),
        };

        let course = store.get_course(DEPT, iii_a(), &c1).await.unwrap();
        assert_eq!(course.instructor, winner);
        let teachers = [&f1, &f2];
        let mut teaching = Vec::new();
        for id in teachers {
            if store.get_faculty(id).await.unwrap().teaches(&c1) {
                teaching.push(id.clone());
            }
        }
        assert_eq!(teaching.len(), 1);
        assert_eq!(Some(teaching[0].clone()), winner);
    }

    #[tokio::test]
    async fn failed_enrolment_releases_the_course() {
        let (store, service) = seeded().await;
        let c1 = CourseId::new("c1");
        store.fail_partition(iii_a()).await;

        let err = service
            .assign_instructor(iii_a(), &c1, &FacultyId::new("f1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Store(_)));

        let course = store.get_course(DEPT, iii_a(), &c1).await.unwrap();
        assert_eq!(course.instructor, None);
        let f1 = store.get_faculty(&FacultyId::new("f1")).await.unwrap();
        assert!(!f1.teaches(&c1));
    }

    #[tokio::test]
    async fn unknown_faculty_leaves_the_course_unclaimed() {
        let (store, service) = seeded().await;
        let c1 = CourseId::new("c1");
        let err = service
            .assign_instructor(iii_a(), &c1, &FacultyId::new("nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::NotFound(_)));
        let course = store.get_course(DEPT, iii_a(), &c1).await.unwrap();
        assert_eq!(course.instructor, None);
    }

    #[tokio::test]
    async fn unassigning_drops_the_course_from_students() {
        let (store, service) = seeded().await;
        let c1 = CourseId::new("c1");
        service.assign_instructor(iii_a(), &c1, &FacultyId::new("f1")).await.unwrap();

        let course = service.unassign_instructor(iii_a(), &c1).await.unwrap();
        assert_eq!(course.instructor, None);
        assert!(course.students.is_empty());
        let students = store.list_students(iii_a()).await.unwrap();
        assert!(students.iter().all(|s| s.courses.is_empty()));

        let err = service.unassign_instructor(iii_a(), &c1).await.unwrap_err();
        assert!(matches!(err, ClearanceError::Validation(_)));
    }

    #[tokio::test]
    async fn mentors_go_to_unassigned_students_in_roll_order() {
        let (store, service) = seeded().await;
        let assigned = service
            .assign_mentor(iii_a(), &FacultyId::new("f1"), 2)
            .await
            .unwrap();
        assert_eq!(assigned, vec![StudentId::new("s2"), StudentId::new("s3")]);

        let next = service
            .assign_mentor(iii_a(), &FacultyId::new("f2"), 1)
            .await
            .unwrap();
        assert_eq!(next, vec![StudentId::new("s1")]);

        let err = service
            .assign_mentor(iii_a(), &FacultyId::new("f2"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Validation(_)));

        let f1 = store.get_faculty(&FacultyId::new("f1")).await.unwrap();
        assert_eq!(f1.roles.mentor.unwrap().students.len(), 2);
    }

    #[tokio::test]
    async fn removing_mentors_updates_students_and_faculty() {
        let (store, service) = seeded().await;
        service.assign_mentor(iii_a(), &FacultyId::new("f1"), 3).await.unwrap();

        let removed = service
            .remove_mentors(iii_a(), &[StudentId::new("s1"), StudentId::new("s404")])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let students = store.list_students(iii_a()).await.unwrap();
        let s1 = students.iter().find(|s| s.id == StudentId::new("s1")).unwrap();
        assert_eq!(s1.mentor, None);
        let f1 = store.get_faculty(&FacultyId::new("f1")).await.unwrap();
        assert_eq!(f1.roles.mentor.unwrap().students.len(), 2);
    }

    #[tokio::test]
    async fn coordinator_category_is_required() {
        let (_store, service) = seeded().await;
        let err = service
            .set_coordinator(&FacultyId::new("f1"), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ClearanceError::Validation(_)));

        let faculty = service
            .set_coordinator(&FacultyId::new("f1"), "Class Coordinator")
            .await
            .unwrap();
        assert_eq!(faculty.coordinator_category(), Some("Class Coordinator"));
    }
}

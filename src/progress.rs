//! Progress aggregation over the Completion Ledger.

use std::collections::HashSet;

use crate::models::{Course, CourseProgress};

/// `round(100 * completed / total)`, half rounding up. Zero videos is 0%.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}

/// Derives progress from the set of completed video ids. Ids that are no longer
/// part of the course are ignored so the result stays within 0..=100.
pub fn course_progress<'a, I>(course: &Course, completed_ids: I) -> CourseProgress
where
    I: IntoIterator<Item = &'a str>,
{
    let done: HashSet<&str> = completed_ids.into_iter().collect();
    let completed_count = course
        .videos
        .iter()
        .filter(|v| done.contains(v.id.as_str()))
        .map(|v| v.id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let total_video_count = course.videos.len();
    CourseProgress {
        completed_count,
        total_video_count,
        progress_percent: percent(completed_count, total_video_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Price, Video};
    use uuid::Uuid;

    fn course(n: usize) -> Course {
        Course {
            id: Uuid::new_v4(),
            title: "c".into(),
            price: Price::Free,
            videos: (1..=n)
                .map(|i| Video { id: i.to_string(), title: format!("Video {i}") })
                .collect(),
            faculty_id: "prof".into(),
            resources: vec![],
        }
    }

    #[test]
    fn two_of_four_is_fifty() {
        let p = course_progress(&course(4), ["1", "3"]);
        assert_eq!(p.completed_count, 2);
        assert_eq!(p.total_video_count, 4);
        assert_eq!(p.progress_percent, 50);
    }

    #[test]
    fn empty_course_is_zero() {
        assert_eq!(course_progress(&course(0), ["1"]).progress_percent, 0);
        assert_eq!(percent(0, 0), 0);
    }

    #[test]
    fn duplicates_and_unknown_ids_are_ignored() {
        let p = course_progress(&course(3), ["1", "1", "gone"]);
        assert_eq!(p.completed_count, 1);
        assert_eq!(p.progress_percent, 33);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn monotone_in_completed_count() {
        for total in 1..=25 {
            let mut last = 0;
            for done in 0..=total {
                let p = percent(done, total);
                assert!(p >= last, "{done}/{total}");
                last = p;
            }
            assert_eq!(last, 100);
        }
    }
}

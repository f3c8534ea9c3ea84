//! Gating and progression for learning journeys.
//!
//! Node 0 starts unlocked, every other node locked. Passing a node's quiz (score at
//! least 66%) completes it and unlocks the next one. `current_node_index` only moves
//! forward. Locked nodes reject both content access and quiz submission.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::domain::{JourneyNode, JourneyState, NodeStatus};
use crate::util::take_chars;

/// Minimum percentage that passes a quiz.
pub const PASS_THRESHOLD: f64 = 66.0;
const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressionError {
  #[error("Journey not found")]
  CourseNotFound,
  #[error("Node not found")]
  NodeNotFound,
  #[error("Node is locked. Complete previous levels first.")]
  Locked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizResult {
  Pass,
  Fail,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuizOutcome {
  pub score: f64,
  pub correct_count: usize,
  pub total: usize,
  pub result: QuizResult,
  pub message: String,
  pub next_node_id: Option<String>,
  pub course_completed: bool,
}

impl JourneyState {
  /// Fresh course: statuses are reset so exactly the first node is unlocked.
  pub fn new(course_id: impl Into<String>, syllabus: &str, mut nodes: Vec<JourneyNode>) -> Self {
    for (i, n) in nodes.iter_mut().enumerate() {
      n.status = if i == 0 { NodeStatus::Unlocked } else { NodeStatus::Locked };
    }
    Self {
      course_id: course_id.into(),
      syllabus_summary: take_chars(syllabus, SUMMARY_CHARS),
      nodes,
      current_node_index: 0,
    }
  }

  pub fn node_index(&self, node_id: &str) -> Result<usize, ProgressionError> {
    self.nodes.iter().position(|n| n.id == node_id).ok_or(ProgressionError::NodeNotFound)
  }

  /// Index of an accessible (unlocked or completed) node.
  pub fn accessible_index(&self, node_id: &str) -> Result<usize, ProgressionError> {
    let idx = self.node_index(node_id)?;
    if self.nodes[idx].status == NodeStatus::Locked {
      return Err(ProgressionError::Locked);
    }
    Ok(idx)
  }

  /// Lesson content is generated at most once; an empty body means not yet.
  pub fn needs_content(&self, idx: usize) -> bool {
    self.nodes.get(idx).map(|n| n.content_summary.is_empty()).unwrap_or(false)
  }

  /// Score a quiz and apply the transition on a pass. `answers[i]` is the chosen
  /// option for question `i`; missing answers count as wrong.
  pub fn submit_quiz(&mut self, node_id: &str, answers: &[usize]) -> Result<QuizOutcome, ProgressionError> {
    let idx = self.accessible_index(node_id)?;
    let node = &self.nodes[idx];
    let already_completed = node.status == NodeStatus::Completed;
    let total = node.quiz_questions.len();
    let correct_count = node
      .quiz_questions
      .iter()
      .zip(answers)
      .filter(|(q, a)| q.correct_answer == **a)
      .count();
    let score = if total == 0 { 100.0 } else { correct_count as f64 / total as f64 * 100.0 };
    let passed = score >= PASS_THRESHOLD;
    debug!(target: "journey", course = %self.course_id, %node_id, score, passed, "Quiz scored");

    if !passed {
      return Ok(QuizOutcome {
        score,
        correct_count,
        total,
        result: QuizResult::Fail,
        message: "You didn't pass. Review the material and try again.".into(),
        next_node_id: None,
        course_completed: false,
      });
    }

    let mut outcome = QuizOutcome {
      score,
      correct_count,
      total,
      result: QuizResult::Pass,
      message: if total == 0 { "No quiz for this node.".into() } else { "Congratulations! You passed.".into() },
      next_node_id: None,
      course_completed: false,
    };
    if already_completed {
      return Ok(outcome);
    }

    self.nodes[idx].status = NodeStatus::Completed;
    match self.nodes.get_mut(idx + 1) {
      Some(next) => {
        if next.status == NodeStatus::Locked {
          next.status = NodeStatus::Unlocked;
        }
        outcome.next_node_id = Some(next.id.clone());
        self.current_node_index = self.current_node_index.max(idx + 1);
      }
      None => {
        outcome.course_completed = true;
        outcome.message = "Course Completed! You represent the pinnacle of learning.".into();
      }
    }
    info!(
      target: "journey",
      course = %self.course_id,
      %node_id,
      next = ?outcome.next_node_id,
      completed = outcome.course_completed,
      "Node completed"
    );
    Ok(outcome)
  }
}

pub type CourseHandle = Arc<Mutex<JourneyState>>;

/// Live courses per user. Each course sits behind its own mutex so operations on one
/// course are serialized while other courses proceed.
#[derive(Default)]
pub struct CourseRegistry {
  courses: RwLock<HashMap<(String, String), CourseHandle>>,
}

impl CourseRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn insert(&self, user_id: &str, state: JourneyState) -> CourseHandle {
    let key = (user_id.to_string(), state.course_id.clone());
    let handle = Arc::new(Mutex::new(state));
    self.courses.write().await.insert(key, handle.clone());
    handle
  }

  pub async fn get(&self, user_id: &str, course_id: &str) -> Result<CourseHandle, ProgressionError> {
    self.courses
      .read()
      .await
      .get(&(user_id.to_string(), course_id.to_string()))
      .cloned()
      .ok_or(ProgressionError::CourseNotFound)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::QuizQuestion;

  fn quiz(answers: &[usize]) -> Vec<QuizQuestion> {
    answers
      .iter()
      .enumerate()
      .map(|(i, a)| QuizQuestion {
        question: format!("q{}", i),
        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct_answer: *a,
      })
      .collect()
  }

  fn course(n: usize) -> JourneyState {
    let nodes = (1..=n)
      .map(|i| {
        let mut node = JourneyNode::new(format!("node_{}", i), format!("T{}", i), "d");
        node.quiz_questions = quiz(&[0, 1, 2]);
        node
      })
      .collect();
    JourneyState::new("c1", "syllabus", nodes)
  }

  #[test]
  fn pass_unlocks_next_and_last_node_completes_course() {
    let mut s = course(3);
    let out = s.submit_quiz("node_1", &[0, 1, 3]).unwrap();
    assert_eq!(out.correct_count, 2);
    assert_eq!(out.result, QuizResult::Pass);
    assert_eq!(out.next_node_id.as_deref(), Some("node_2"));
    assert_eq!(s.nodes[0].status, NodeStatus::Completed);
    assert_eq!(s.nodes[1].status, NodeStatus::Unlocked);
    assert_eq!(s.current_node_index, 1);

    s.submit_quiz("node_2", &[0, 1, 2]).unwrap();
    let last = s.submit_quiz("node_3", &[0, 1, 2]).unwrap();
    assert!(last.course_completed);
    assert_eq!(last.next_node_id, None);
    assert_eq!(s.current_node_index, 2);
    assert!(s.nodes.iter().all(|n| n.status == NodeStatus::Completed));
  }

  #[test]
  fn failing_leaves_state_untouched() {
    let mut s = course(2);
    let before = s.clone();
    let out = s.submit_quiz("node_1", &[0]).unwrap();
    assert_eq!(out.result, QuizResult::Fail);
    assert!((out.score - 33.333).abs() < 0.01);
    assert_eq!(s, before);
  }

  #[test]
  fn locked_nodes_reject_access_and_submission() {
    let mut s = course(2);
    assert_eq!(s.accessible_index("node_2"), Err(ProgressionError::Locked));
    assert_eq!(s.submit_quiz("node_2", &[0, 1, 2]), Err(ProgressionError::Locked));
    assert_eq!(s.submit_quiz("nope", &[]), Err(ProgressionError::NodeNotFound));
  }

  #[test]
  fn current_index_never_moves_back_on_resubmission() {
    let mut s = course(3);
    s.submit_quiz("node_1", &[0, 1, 2]).unwrap();
    s.submit_quiz("node_2", &[0, 1, 2]).unwrap();
    let again = s.submit_quiz("node_1", &[0, 1, 2]).unwrap();
    assert_eq!(again.result, QuizResult::Pass);
    assert_eq!(again.next_node_id, None);
    assert_eq!(s.current_node_index, 2);
    assert_eq!(s.nodes[1].status, NodeStatus::Completed);
  }

  #[test]
  fn empty_quiz_passes_automatically() {
    let mut s = course(2);
    s.nodes[0].quiz_questions.clear();
    let out = s.submit_quiz("node_1", &[]).unwrap();
    assert_eq!(out.message, "No quiz for this node.");
    assert_eq!(s.nodes[1].status, NodeStatus::Unlocked);
  }

  #[test]
  fn new_course_normalizes_statuses() {
    let mut nodes = vec![JourneyNode::new("a", "A", ""), JourneyNode::new("b", "B", "")];
    nodes[1].status = NodeStatus::Completed;
    let s = JourneyState::new("c", &"s".repeat(300), nodes);
    assert_eq!(s.nodes[0].status, NodeStatus::Unlocked);
    assert_eq!(s.nodes[1].status, NodeStatus::Locked);
    assert_eq!(s.syllabus_summary.len(), 200);
  }

  #[tokio::test]
  async fn registry_scopes_courses_by_user() {
    let reg = CourseRegistry::new();
    reg.insert("alice", course(1)).await;
    assert!(reg.get("alice", "c1").await.is_ok());
    assert_eq!(reg.get("bob", "c1").await.err(), Some(ProgressionError::CourseNotFound));
  }
}

//! Hand-authored defaults: the per-stage fallback table and a few built-in bank
//! documents so the service is usable without external config or a retriever.

use crate::domain::{BlueprintModule, ExamStructure, JourneyNode, LectureScript, NodeStatus, QuizQuestion, Scene};
use crate::services::retriever::{DocMetadata, Document, EXAM_COLLECTION};

pub const TUTOR_FALLBACK_RESPONSE: &str =
  "I couldn't prepare a full answer right now. Please try again in a moment, or rephrase your question.";

pub const LESSON_CONTEXT_FALLBACK: &str = "No specific documents found for this topic.";

pub const DOUBT_FALLBACK_ANSWER: &str =
  "Beta, sorry! There seems to be a technical issue. Please try asking your doubt again.";

/// Reference paper used when a caller supplies none (university unit-wise pattern).
pub const DEFAULT_REFERENCE_TEXT: &str = "\
CS36 - JAN 2022
Answer any FIVE full questions, selecting ONE full question from each unit.
UNIT - 1
1. a) Define Machine Learning. Explain the steps in designing a learning system. (8 Marks)
   b) Explain the Find-S (Maximally Specific Hypothesis) algorithm with an example. (8 Marks)
   c) Differentiate between Supervised and Unsupervised Learning. (4 Marks)
OR
2. a) Explain the Candidate-Elimination algorithm. (10 Marks)
   b) Write a short note on Inductive Bias. (10 Marks)

UNIT - 2
... (Similar pattern continues)
";

pub fn fallback_blueprint() -> Vec<BlueprintModule> {
  let m = |module: &str, marks: u32, topics: &[&str]| BlueprintModule {
    module: module.into(),
    marks,
    topics: topics.iter().map(|t| t.to_string()).collect(),
  };
  vec![
    m("Core Concepts", 30, &["Fundamentals", "Definitions"]),
    m("Applications", 25, &["Practical applications"]),
    m("Advanced Topics", 25, &["Complex concepts"]),
    m("Problem Solving", 20, &["Numerical problems"]),
  ]
}

/// Standard university pattern: five units of a/b/c with an OR choice.
pub fn fallback_exam_structure() -> ExamStructure {
  ExamStructure {
    structure_type: "unit_wise".into(),
    unit_count: 5,
    subquestion_labels: vec!["a".into(), "b".into(), "c".into()],
    has_or_choice: true,
    marks_per_subquestion: 7,
  }
}

pub fn fallback_curriculum() -> Vec<JourneyNode> {
  let mut nodes = vec![
    JourneyNode::new("node_1", "Introduction", "Learn the basics"),
    JourneyNode::new("node_2", "Core Concepts", "Understand key ideas"),
    JourneyNode::new("node_3", "Advanced Topics", "Master advanced concepts"),
  ];
  nodes[0].status = NodeStatus::Unlocked;
  nodes
}

pub fn fallback_lesson(title: &str) -> (String, Vec<QuizQuestion>) {
  let content = format!(
    "## {title}\n\nWe're having trouble generating specific content for this topic right now.\n\n\
     ### What You Can Do:\n1. Make sure you've uploaded relevant documents\n2. Try refreshing the page\n\
     3. Contact support if the issue persists\n\n*This is a fallback message - please try again.*"
  );
  let quiz = vec![QuizQuestion {
    question: "What is the main topic of this lesson?".into(),
    options: vec![title.into(), "Unrelated Topic".into(), "Random Answer".into(), "None of the above".into()],
    correct_answer: 0,
  }];
  (content, quiz)
}

pub fn fallback_lecture_script(topic: &str) -> LectureScript {
  LectureScript {
    title: format!("Lecture: {}", topic),
    scenes: vec![
      Scene {
        visual: "educational classroom".into(),
        narration: format!("Welcome to this lecture about {}. Let's explore this topic together.", topic),
      },
      Scene {
        visual: topic.into(),
        narration: format!("Today we'll learn about the key concepts of {} and why they matter.", topic),
      },
      Scene {
        visual: "books and learning".into(),
        narration: "Thank you for watching. Keep learning and stay curious!".into(),
      },
    ],
  }
}

/// Minimal exam bank so blueprint selection has something to pick from out of the box.
pub fn seed_documents() -> Vec<(&'static str, Document)> {
  let q = |text: &str, marks: u32, module: &str| {
    (
      EXAM_COLLECTION,
      Document::new(text).with_metadata(DocMetadata {
        marks: Some(marks),
        module: Some(module.into()),
        source_file: Some("CS36_JAN_2022.pdf".into()),
        year: Some("2022".into()),
        difficulty: Some("Medium".into()),
      }),
    )
  };
  vec![
    q("Define Machine Learning. Explain the steps in designing a learning system.", 8, "Core Concepts"),
    q("Explain the Find-S (Maximally Specific Hypothesis) algorithm with an example.", 8, "Core Concepts"),
    q("Differentiate between Supervised and Unsupervised Learning.", 4, "Core Concepts"),
    q("Explain the Candidate-Elimination algorithm.", 10, "Advanced Topics"),
    q("Write a short note on Inductive Bias.", 10, "Advanced Topics"),
  ]
}

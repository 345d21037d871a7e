//! Built-in content for the offline question source.
//!
//! Each tree is a root question plus follow-ups keyed by the exact text of the
//! wrong answer that leads to them. The trees are static, finite and acyclic.

use crate::domain::Question;

#[derive(Clone, Debug)]
pub struct QuestionNode {
  pub question: Question,
  pub followups: Vec<(String, QuestionNode)>,
}

impl QuestionNode {
  pub fn followup(&self, answer: &str) -> Option<&QuestionNode> {
    self.followups.iter().find(|(a, _)| a == answer).map(|(_, n)| n)
  }
}

/// A curriculum known to the offline source: matched by substring of the topic.
pub struct TopicSkills {
  pub key: &'static str,
  pub skills: &'static [&'static str],
}

pub const TOPIC_SKILLS: &[TopicSkills] = &[
  TopicSkills { key: "python", skills: &["Variables and Data Types", "Control Flow", "Functions"] },
  TopicSkills { key: "math", skills: &["Basic Arithmetic", "Fractions", "Order of Operations"] },
];

/// Suffixes used to build a curriculum for unknown topics: "{topic} - {suffix}".
pub const GENERIC_SKILLS: &[&str] = &["Fundamental Concepts", "Core Principles", "Practical Applications"];

macro_rules! node {
  ($text:expr, $correct:expr, [$($wrong:expr),+ $(,)?] $(, { $($ans:expr => $child:expr),* $(,)? })?) => {
    QuestionNode {
      question: Question::new($text, $correct, [$($wrong),+]),
      followups: vec![$($(($ans.to_string(), $child)),*)?],
    }
  };
}

/// Question trees keyed by lower-case skill name.
pub fn skill_trees() -> Vec<(&'static str, Vec<QuestionNode>)> {
  vec![
    ("variables and data types", vec![
      node!("Which line creates a variable holding the number 5 in Python?", "x = 5",
        ["var x = 5", "int x = 5", "let x = 5"], {
        "var x = 5" => node!("Which language declares variables with the keyword 'var'?", "JavaScript",
          ["Python", "Rust", "SQL"], {
          "Python" => node!("What does Python need before a new name can hold a value?", "Nothing, assignment creates it",
            ["A 'var' keyword", "A type annotation", "An import statement"]),
        }),
        "int x = 5" => node!("Python decides the type of a variable when?", "At runtime, from the value",
          ["At compile time, from a declaration", "Never, everything is a string", "When the file is saved"], {
          "At compile time, from a declaration" => node!("What does type(5) return in Python?", "<class 'int'>",
            ["int x", "number", "5"]),
        }),
      }),
      node!("What is the type of the value 3.0 in Python?", "float",
        ["int", "str", "decimal"], {
        "int" => node!("Which of these literals is an int in Python?", "3",
          ["3.0", "'3'", "3e0"]),
      }),
    ]),
    ("control flow", vec![
      node!("How many times does `for i in range(3):` run its body?", "3",
        ["2", "4", "It runs forever"], {
        "4" => node!("What is the first value produced by range(3)?", "0",
          ["1", "3", "-1"], {
          "1" => node!("Python sequences start counting from which index?", "0",
            ["1", "-1", "It depends on the sequence"]),
        }),
        "2" => node!("Which values does range(3) produce?", "0, 1, 2",
          ["1, 2", "1, 2, 3", "0, 1, 2, 3"]),
      }),
    ]),
    ("functions", vec![
      node!("What does a Python function return when it has no return statement?", "None",
        ["0", "An empty string", "It raises an error"], {
        "0" => node!("Which value represents 'no value' in Python?", "None",
          ["0", "False", "null"]),
        "It raises an error" => node!("Is a function body without `return` valid Python?", "Yes, it returns None implicitly",
          ["No, return is mandatory", "Only inside classes", "Only if it prints something"]),
      }),
    ]),
    ("basic arithmetic", vec![
      node!("What is 7 × 8?", "56",
        ["54", "64", "48"], {
        "54" => node!("What is 7 × 7?", "49",
          ["42", "56", "47"], {
          "42" => node!("What is 7 + 7?", "14",
            ["12", "15", "49"]),
        }),
        "64" => node!("Which of these equals 8 × 8?", "64",
          ["56", "72", "16"]),
      }),
      node!("What is 100 − 37?", "63",
        ["73", "67", "137"], {
        "73" => node!("What is 100 − 30?", "70",
          ["60", "80", "130"]),
      }),
    ]),
    ("fractions", vec![
      node!("What is 1/2 + 1/4?", "3/4",
        ["2/6", "1/6", "2/4"], {
        "2/6" => node!("To add fractions with different denominators you first need…", "A common denominator",
          ["To add the denominators", "To multiply the numerators", "To flip the second fraction"], {
          "To add the denominators" => node!("Is 1/4 + 1/4 equal to 2/8 or 2/4?", "2/4",
            ["2/8", "Both", "Neither"]),
        }),
        "2/4" => node!("How many quarters make one half?", "2",
          ["1", "4", "3"]),
      }),
    ]),
    ("order of operations", vec![
      node!("What is 2 + 3 × 4?", "14",
        ["20", "24", "12"], {
        "20" => node!("In 2 + 3 × 4, which operation happens first?", "Multiplication",
          ["Addition", "Whichever is leftmost", "Whichever is rightmost"], {
          "Addition" => node!("What does the M in PEMDAS stand for?", "Multiplication",
            ["Minus", "Modulo", "Mean"]),
        }),
        "24" => node!("What is (2 + 3) × 4 compared with 2 + 3 × 4?", "20 versus 14",
          ["Both are 20", "Both are 14", "24 versus 14"]),
      }),
    ]),
  ]
}

/// Trees served for skills that match nothing in `skill_trees`.
pub fn generic_trees() -> Vec<QuestionNode> {
  vec![
    node!("Which approach usually works best when learning something new?", "Start with the basics and build up",
      ["Jump straight to advanced material", "Memorize everything at once", "Skip the theory entirely"], {
      "Jump straight to advanced material" => node!("Why does skipping the basics tend to backfire?", "Advanced ideas build on the basics",
        ["It never backfires", "Basics are the hardest part", "Advanced material is shorter"]),
      "Memorize everything at once" => node!("What tends to outlast rote memorization?", "Understanding and applying ideas",
        ["Reading faster", "Longer study sessions", "Rewriting notes verbatim"]),
    }),
    node!("What helps most with remembering new information?", "Spaced review over several days",
      ["Reading it once", "Highlighting every line", "Cramming the night before"], {
      "Reading it once" => node!("What does the forgetting curve describe?", "How fast memory fades without review",
        ["A learning disability", "A chart of exam scores", "How memory improves over time"]),
    }),
  ]
}

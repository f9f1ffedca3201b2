//! Prompt templates for Cram.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub study: StudyPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for the study-guide request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyPrompts {
    /// Instruction template. `{{content}}` receives the study material.
    pub template: String,
    /// Replaces `{{content}}` when the material travels as an attachment.
    pub attachment_note: String,
}

impl Default for StudyPrompts {
    fn default() -> Self {
        Self {
            template: r#"You are the best exam-prep tutor in the country. Analyze the study material below so that a student can prepare for an exam with it.

Answer in {{language}}, split into exactly these three parts:

[Part 1. Three-line summary]
- Summarize the whole material in the three most important sentences, simple enough for a middle-school student.
- Use emoji where they help readability.

[Part 2. Key terms & explanations]
- Pick the 5 technical terms or keywords most likely to appear on an exam.
- Add a one-line, easy explanation for each term.

[Part 3. Practice multiple-choice questions]
- Write 3 multiple-choice questions with 4 options each, based on the material.
- Put the answer and a clear explanation directly below each question.
- Emphasize the correct answer in **bold**.

[Study material]
{{content}}"#
                .to_string(),

            attachment_note: "The study material is the attached {{attachment_kind}}. Work from its contents."
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        prompts
            .variables
            .insert("language".to_string(), "the same language as the study material".to_string());

        if let Some(vars) = custom_variables {
            for (key, value) in vars {
                prompts.variables.insert(key.clone(), value.clone());
            }
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let study_path = custom_path.join("study.toml");
            if study_path.exists() {
                let content = std::fs::read_to_string(&study_path)?;
                prompts.study = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// The study template with custom variables applied and `{{content}}` left in place.
    pub fn study_template(&self) -> String {
        let mut vars = self.variables.clone();
        vars.remove("content");
        Self::render(&self.study.template, &vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.study.template.contains("{{content}}"));
        assert!(prompts.study.template.contains("[Part 3."));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_study_template_keeps_content_slot() {
        let mut vars = HashMap::new();
        vars.insert("language".to_string(), "Korean".to_string());
        vars.insert("content".to_string(), "should not be substituted".to_string());

        let prompts = Prompts::load(None, Some(&vars)).unwrap();
        let template = prompts.study_template();

        assert!(template.contains("Answer in Korean"));
        assert!(template.contains("{{content}}"));
    }
}

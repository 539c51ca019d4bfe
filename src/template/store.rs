use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use super::engine::Template;

pub const DEFAULT_TEMPLATE_NAME: &str = "default";

const DEFAULT_SUBJECT: &str = "NOTICE TO SUBMIT LACKING REQUIREMENTS - {{fullname}}";
const DEFAULT_BODY: &str = "<p>Dear {{fullname}},</p>\n\
<p>This is to formally inform you that you still have outstanding requirements as of this date.</p>\n\
<p>Please see the attached notice for full details and reply through this same email thread.</p>\n\
<p>Thanks,</p>";

#[derive(thiserror::Error, Debug)]
pub enum TemplateStoreError {
    #[error("template name must not be empty")]
    EmptyName,
    #[error("the built-in template can't be replaced or deleted")]
    BuiltIn,
    #[error("template {0} not found")]
    NotFound(String),
    #[error("couldn't access the template file, io error {0}")]
    Io(#[from] std::io::Error),
    #[error("the template file is corrupt, {0}")]
    Format(#[from] serde_json::Error),
}

/// Named message templates, written back to disk on every change.
#[derive(Debug)]
pub struct TemplateStore {
    path: Option<PathBuf>,
    templates: BTreeMap<String, Template>,
}

impl TemplateStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            templates: BTreeMap::new(),
        }
    }

    /// A missing file is an empty store; the file is created on the first save.
    #[tracing::instrument(name = "Loading saved templates")]
    pub fn load(path: &Path) -> Result<Self, TemplateStoreError> {
        let templates = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            templates,
        })
    }

    pub fn builtin() -> Template {
        Template::new(DEFAULT_TEMPLATE_NAME, DEFAULT_SUBJECT, DEFAULT_BODY)
    }

    pub fn get(&self, name: &str) -> Result<Template, TemplateStoreError> {
        if name == DEFAULT_TEMPLATE_NAME {
            return Ok(Self::builtin());
        }
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateStoreError::NotFound(name.to_string()))
    }

    /// Built-in template first, then saved ones by name.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(DEFAULT_TEMPLATE_NAME.to_string())
            .chain(self.templates.keys().cloned())
            .collect()
    }

    #[tracing::instrument(
        name = "Saving template",
        skip(self, template),
        fields(template_name = %template.name)
    )]
    pub fn save(&mut self, mut template: Template) -> Result<(), TemplateStoreError> {
        template.name = template.name.trim().to_string();
        if template.name.is_empty() {
            return Err(TemplateStoreError::EmptyName);
        }
        if template.name == DEFAULT_TEMPLATE_NAME {
            return Err(TemplateStoreError::BuiltIn);
        }
        self.templates.insert(template.name.clone(), template);
        self.persist()
    }

    #[tracing::instrument(name = "Deleting template", skip(self))]
    pub fn delete(&mut self, name: &str) -> Result<Template, TemplateStoreError> {
        if name == DEFAULT_TEMPLATE_NAME {
            return Err(TemplateStoreError::BuiltIn);
        }
        let removed = self
            .templates
            .remove(name)
            .ok_or_else(|| TemplateStoreError::NotFound(name.to_string()))?;
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> Result<(), TemplateStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.templates)?)?;
        Ok(())
    }
}

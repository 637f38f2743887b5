use reqwest::Url;
use sb_schema::AppId;

/// Connection metadata for one downstream skill, loaded once at startup.
#[derive(Debug, Clone)]
pub struct SkillDescriptor {
    pub id: String,
    pub app_id: AppId,
    pub endpoint: Url,
}

/// Process-lifetime-immutable set of known skills.
///
/// Lookup misses are not errors: an unknown caller means the activity passes
/// through untouched.
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: Vec<SkillDescriptor>,
}

impl SkillRegistry {
    pub fn new(skills: Vec<SkillDescriptor>) -> Self {
        Self { skills }
    }

    pub fn lookup_by_app_id(&self, app_id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.app_id.matches(app_id))
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillDescriptor> {
        self.skills.iter()
    }
}

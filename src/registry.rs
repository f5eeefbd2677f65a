use std::collections::BTreeSet;

use crate::config::NameLookup;
use crate::tasks::TaskRegistry;
use crate::template::TemplateRegistry;

/// Tasks and templates a run can reference
#[derive(Clone, Default)]
pub struct Registry {
    pub tasks: TaskRegistry,
    pub templates: TemplateRegistry,
}

impl Registry {
    pub fn new(tasks: TaskRegistry, templates: TemplateRegistry) -> Self {
        Self { tasks, templates }
    }
}

impl NameLookup for Registry {
    fn task_names(&self) -> BTreeSet<String> {
        self.tasks.names().map(str::to_string).collect()
    }

    fn template_names(&self) -> BTreeSet<String> {
        self.templates.names().map(str::to_string).collect()
    }
}

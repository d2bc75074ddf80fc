//! Known collaborators, used to turn spoken owner names into assignees.

/// Roster of people that can be assigned work items.
#[derive(Debug, Clone, Default)]
pub struct Collaborators {
    /// `(display name, assignee id)` in configuration order.
    entries: Vec<(String, String)>,
}

impl Collaborators {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve an owner name to an assignee id.
    ///
    /// A case-insensitive full-name match wins. A bare first name resolves
    /// only when exactly one collaborator has it.
    pub fn resolve(&self, owner: &str) -> Option<&str> {
        let owner = owner.trim().to_lowercase();
        if owner.is_empty() {
            return None;
        }

        if let Some((_, id)) = self
            .entries
            .iter()
            .find(|(name, _)| name.trim().to_lowercase() == owner)
        {
            return Some(id.as_str());
        }

        // A full name that did not match is a different person.
        if owner.split_whitespace().count() > 1 {
            return None;
        }

        let owner_first = first_name(&owner);
        let mut hits = self.entries.iter().filter(|(name, _)| {
            let name = name.trim().to_lowercase();
            first_name(&name) == owner_first
        });
        match (hits.next(), hits.next()) {
            (Some((_, id)), None) => Some(id.as_str()),
            _ => None,
        }
    }
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

//! Projects: named groupings of sessions with a shared working directory
//! and environment.
//!
//! Projects are reference counted. The creator holds the first reference;
//! in-flight operations take additional holds with [`ProjectStore::add_ref`]
//! and release them with [`ProjectStore::remove_ref`]. When the count
//! reaches zero the owner of the store must schedule
//! [`ProjectStore::finalize`] for a *later* tick, never call it inline from
//! `remove_ref` - that deferral is what keeps handles held by code still on
//! the current call stack valid through teardown.
//!
//! Destruction is two-phase: [`ProjectStore::begin_destroy`] unlinks the
//! project from the name registry, the caller strips member sessions and
//! owned resources with [`ProjectStore::take_sessions`] and
//! [`ProjectStore::release_owned`], and the deferred `finalize` returns the
//! arena slot once the last hold is gone.
//! The arena entry stays readable between the two phases so operations that
//! already hold a `ProjectId` can still log its name.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::environ::Environ;
use crate::error::{CoreError, CoreResult};
use crate::ids::{IdAllocator, ProjectId, SessionId};
use crate::registry::Registry;

/// A project record.
///
/// `cwd` and `environ` are `Option` because destruction releases them
/// before the record itself is finalized.
#[derive(Debug, Clone)]
pub struct Project {
    /// Process-lifetime unique id.
    pub id: ProjectId,
    /// Unique name; the key of the global name registry.
    pub name: String,
    /// Working directory inherited by sessions created in this project.
    pub cwd: Option<PathBuf>,
    /// Owned environment set seeding session environments.
    pub environ: Option<Environ>,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// Last activity in any member session.
    pub activity_at: DateTime<Utc>,
    /// Live holds on this record. Starts at 1 (the creator's hold).
    pub references: u32,
    /// Weak reference to the current session, `None` when the project has
    /// no sessions or destruction has begun.
    pub current_session: Option<SessionId>,
    /// Member sessions. Weak back-references; sessions are never owned.
    pub sessions: BTreeSet<SessionId>,
    /// Set once destruction has begun; guards double-destroy.
    pub destroying: bool,
}

impl Project {
    /// True if this project is still in the global name registry.
    pub fn is_alive(&self) -> bool {
        !self.destroying
    }
}

/// What `remove_ref` asks its caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAction {
    /// Holds remain; nothing to do.
    None,
    /// The count reached zero: schedule a deferred [`ProjectStore::finalize`]
    /// on the next control-loop tick. Never finalize inline.
    ScheduleFree,
}

/// Arena of project records plus the live-name registry.
#[derive(Debug, Default)]
pub struct ProjectStore {
    arena: HashMap<ProjectId, Project>,
    names: Registry<String, ProjectId>,
    ids: IdAllocator,
}

impl ProjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new project and registers its name.
    ///
    /// With an explicit `name`, the caller is responsible for having
    /// checked uniqueness; a collision is still reported rather than
    /// corrupting the registry. Without one, the name is synthesized as
    /// `"<prefix>-<id>"`, retrying id assignment until the synthesized name
    /// is free.
    pub fn create(
        &mut self,
        prefix: &str,
        name: Option<&str>,
        cwd: &Path,
        environ: Option<Environ>,
        now: DateTime<Utc>,
    ) -> CoreResult<ProjectId> {
        let (id, name) = match name {
            Some(name) => {
                if self.names.contains(&name.to_string()) {
                    return Err(CoreError::duplicate(name));
                }
                (ProjectId(self.ids.next_id()), name.to_string())
            }
            None => loop {
                let id = ProjectId(self.ids.next_id());
                let candidate = format!("{prefix}-{id}");
                if !self.names.contains(&candidate) {
                    break (id, candidate);
                }
            },
        };

        let project = Project {
            id,
            name: name.clone(),
            cwd: Some(cwd.to_path_buf()),
            environ: Some(environ.unwrap_or_default()),
            created_at: now,
            activity_at: now,
            references: 1,
            current_session: None,
            sessions: BTreeSet::new(),
            destroying: false,
        };

        self.arena.insert(id, project);
        self.names.insert(name.clone(), id)?;

        debug!(project = %name, id = %id, "new project");
        Ok(id)
    }

    /// Finds a live project by name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        let id = self.names.find(&name.to_string())?;
        self.arena.get(id)
    }

    /// Finds a live project id by name.
    pub fn find_id(&self, name: &str) -> Option<ProjectId> {
        self.names.find(&name.to_string()).copied()
    }

    /// Finds a live project by numeric id.
    ///
    /// Only projects still in the name registry count as found; a record
    /// awaiting finalization is not observable here.
    pub fn find_by_id(&self, id: ProjectId) -> Option<&Project> {
        self.arena.get(&id).filter(|p| p.is_alive())
    }

    /// Finds a live project from the `#<id>` reference form.
    pub fn find_by_id_ref(&self, s: &str) -> Option<&Project> {
        self.find_by_id(ProjectId::parse_ref(s)?)
    }

    /// Direct arena access by id; includes records awaiting finalization.
    pub fn get(&self, id: ProjectId) -> Option<&Project> {
        self.arena.get(&id)
    }

    /// Mutable arena access by id.
    pub fn get_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.arena.get_mut(&id)
    }

    /// Number of live (registered) projects.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if no live projects exist.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Live project names in order; safe to act destructively per name.
    pub fn names_snapshot(&self) -> Vec<String> {
        self.names.keys_snapshot()
    }

    /// Live project ids in name order.
    pub fn ids_snapshot(&self) -> Vec<ProjectId> {
        self.names.iter().map(|(_, id)| *id).collect()
    }

    /// Begins destruction: marks destruction started, clears the
    /// current-session marker, and removes the name from the global
    /// registry so no new lookups find the project. Returns the name.
    ///
    /// Idempotent: a second call on the same project returns `None` and has
    /// no effect. The caller continues the protocol with
    /// [`ProjectStore::take_sessions`] and [`ProjectStore::release_owned`],
    /// and finally drops the creator's hold with
    /// [`ProjectStore::remove_ref`].
    pub fn begin_destroy(&mut self, id: ProjectId) -> Option<String> {
        let project = self.arena.get_mut(&id)?;
        if project.destroying {
            return None;
        }

        project.destroying = true;
        project.current_session = None;

        let name = project.name.clone();
        self.names.remove(&name);

        debug!(project = %name, id = %id, "destroy project");
        Some(name)
    }

    /// Empties the member session set, returning the detached ids so the
    /// caller can clear their back-references. Sessions are detached,
    /// never destroyed.
    pub fn take_sessions(&mut self, id: ProjectId) -> Vec<SessionId> {
        match self.arena.get_mut(&id) {
            Some(project) => std::mem::take(&mut project.sessions).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Releases the owned environment set and working directory.
    pub fn release_owned(&mut self, id: ProjectId) {
        if let Some(project) = self.arena.get_mut(&id) {
            project.environ = None;
            project.cwd = None;
        }
    }

    /// Takes a hold on the project. `from` tags the holder for logging.
    pub fn add_ref(&mut self, id: ProjectId, from: &str) {
        if let Some(project) = self.arena.get_mut(&id) {
            project.references += 1;
            debug!(project = %project.name, from, references = project.references, "add ref");
        }
    }

    /// Drops a hold on the project.
    ///
    /// Returns [`RefAction::ScheduleFree`] when the count reaches zero; the
    /// caller schedules [`ProjectStore::finalize`] for the next tick.
    pub fn remove_ref(&mut self, id: ProjectId, from: &str) -> RefAction {
        let Some(project) = self.arena.get_mut(&id) else {
            return RefAction::None;
        };
        project.references = project.references.saturating_sub(1);
        debug!(project = %project.name, from, references = project.references, "remove ref");
        if project.references == 0 {
            RefAction::ScheduleFree
        } else {
            RefAction::None
        }
    }

    /// Deferred finalization: returns the arena slot if the count is still
    /// zero.
    ///
    /// The re-check is required - a hold may have been re-acquired between
    /// the zero-crossing and this tick, in which case this is a no-op.
    /// Returns true if the record was freed.
    pub fn finalize(&mut self, id: ProjectId) -> bool {
        let Some(project) = self.arena.get(&id) else {
            return false;
        };
        if project.references != 0 {
            debug!(
                project = %project.name,
                references = project.references,
                "finalize skipped, reference re-acquired"
            );
            return false;
        }
        if let Some(project) = self.arena.remove(&id) {
            // A project that was never destroyed must not be finalized
            // while still registered.
            self.names.remove(&project.name);
            debug!(project = %project.name, id = %id, "freed project");
        }
        true
    }

    /// Attaches a session to a project, making it current if the project
    /// has none.
    pub fn attach_session(&mut self, id: ProjectId, session: SessionId) {
        if let Some(project) = self.arena.get_mut(&id) {
            project.sessions.insert(session);
            if project.current_session.is_none() && !project.destroying {
                project.current_session = Some(session);
            }
        }
    }

    /// Detaches a session from a project.
    ///
    /// If the detached session was current, the lowest remaining session id
    /// is promoted. Returns true if the project is now empty.
    pub fn detach_session(&mut self, id: ProjectId, session: SessionId) -> bool {
        let Some(project) = self.arena.get_mut(&id) else {
            return false;
        };
        project.sessions.remove(&session);
        if project.current_session == Some(session) {
            project.current_session = project.sessions.iter().next().copied();
            if project.current_session.is_none() {
                return true;
            }
        }
        false
    }

    /// Renames a live project via remove-then-reinsert on the name
    /// registry.
    ///
    /// # Errors
    ///
    /// - `CoreError::NotFound` if the project is gone or destroying.
    /// - `CoreError::DuplicateKey` if the new name is taken; the project
    ///   keeps its old name.
    pub fn rename(&mut self, id: ProjectId, new_name: &str) -> CoreResult<()> {
        let old_name = match self.arena.get(&id) {
            Some(p) if p.is_alive() => p.name.clone(),
            _ => return Err(CoreError::not_found(id)),
        };
        if old_name == new_name {
            return Ok(());
        }
        self.names.rename(&old_name, new_name.to_string())?;
        if let Some(project) = self.arena.get_mut(&id) {
            project.name = new_name.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn create(store: &mut ProjectStore, name: Option<&str>) -> ProjectId {
        store
            .create("project", name, Path::new("/tmp"), None, now())
            .unwrap()
    }

    #[test]
    fn test_create_named() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));

        let p = store.find("work").unwrap();
        assert_eq!(p.id, id);
        assert_eq!(p.references, 1);
        assert!(p.sessions.is_empty());
        assert_eq!(p.current_session, None);
        assert_eq!(p.cwd.as_deref(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_create_duplicate_name_rejected() {
        let mut store = ProjectStore::new();
        create(&mut store, Some("work"));
        let err = store
            .create("project", Some("work"), Path::new("/"), None, now())
            .unwrap_err();
        assert_eq!(err, CoreError::duplicate("work"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_synthesized_names_are_unique() {
        let mut store = ProjectStore::new();
        let mut names = std::collections::HashSet::new();
        let mut last_id = None;

        for i in 0..100 {
            // Delete an earlier project now and then; its id must not be
            // reassigned to a later synthesized name.
            if i == 50 {
                let victim = store.find_id("project-10").unwrap();
                store.begin_destroy(victim).unwrap();
                store.remove_ref(victim, "test");
                store.finalize(victim);
            }
            let id = create(&mut store, None);
            if let Some(last) = last_id {
                assert!(id.as_u64() > last, "ids must be monotonic");
            }
            last_id = Some(id.as_u64());
            let name = store.get(id).unwrap().name.clone();
            assert!(names.insert(name), "synthesized name collided");
        }
    }

    #[test]
    fn test_synthesis_skips_explicitly_taken_name() {
        let mut store = ProjectStore::new();
        // Occupy the name the next synthesized id would produce.
        let next = store.ids.peek();
        store
            .create(
                "project",
                Some(&format!("project-{next}")),
                Path::new("/"),
                None,
                now(),
            )
            .unwrap();

        let id = create(&mut store, None);
        let name = store.get(id).unwrap().name.clone();
        assert_ne!(name, format!("project-{next}"));
        assert!(store.find(&name).is_some());
    }

    #[test]
    fn test_destroy_unlinks_and_detaches() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));
        store.attach_session(id, SessionId(1));
        store.attach_session(id, SessionId(2));

        let name = store.begin_destroy(id).unwrap();
        assert_eq!(name, "work");

        // No longer observable through any lookup path.
        assert!(store.find("work").is_none());
        assert!(store.find_by_id(id).is_none());
        assert_eq!(store.len(), 0);

        let detached = store.take_sessions(id);
        assert_eq!(detached, vec![SessionId(1), SessionId(2)]);
        store.release_owned(id);

        // Owned resources released, record still in the arena.
        let p = store.get(id).unwrap();
        assert!(p.environ.is_none());
        assert!(p.cwd.is_none());
        assert!(p.sessions.is_empty());
        assert_eq!(p.current_session, None);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));
        store.attach_session(id, SessionId(1));

        assert!(store.begin_destroy(id).is_some());
        assert!(store.begin_destroy(id).is_none());
        assert!(store.begin_destroy(id).is_none());
    }

    #[test]
    fn test_refcount_free_exactly_once_after_last_drop() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));

        store.add_ref(id, "op-a");
        store.add_ref(id, "op-b");

        store.begin_destroy(id).unwrap();
        assert_eq!(store.remove_ref(id, "destroy"), RefAction::None);
        assert_eq!(store.remove_ref(id, "op-a"), RefAction::None);

        // Record must survive while holds remain.
        assert!(store.get(id).is_some());
        assert!(!store.finalize(id));

        assert_eq!(store.remove_ref(id, "op-b"), RefAction::ScheduleFree);
        assert!(store.finalize(id));
        assert!(store.get(id).is_none());

        // A second finalize finds nothing to free.
        assert!(!store.finalize(id));
    }

    #[test]
    fn test_finalize_skipped_when_hold_reacquired() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));

        store.begin_destroy(id).unwrap();
        assert_eq!(store.remove_ref(id, "destroy"), RefAction::ScheduleFree);

        // Hold re-acquired before the deferred tick ran.
        store.add_ref(id, "late-holder");
        assert!(!store.finalize(id));
        assert!(store.get(id).is_some());

        assert_eq!(store.remove_ref(id, "late-holder"), RefAction::ScheduleFree);
        assert!(store.finalize(id));
    }

    #[test]
    fn test_attach_detach_current_session() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));

        store.attach_session(id, SessionId(5));
        store.attach_session(id, SessionId(3));
        assert_eq!(store.get(id).unwrap().current_session, Some(SessionId(5)));

        // Detaching the current session promotes the lowest remaining.
        assert!(!store.detach_session(id, SessionId(5)));
        assert_eq!(store.get(id).unwrap().current_session, Some(SessionId(3)));

        // Detaching the last reports the project empty.
        assert!(store.detach_session(id, SessionId(3)));
        assert_eq!(store.get(id).unwrap().current_session, None);
    }

    #[test]
    fn test_rename() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("old"));
        create(&mut store, Some("taken"));

        let err = store.rename(id, "taken").unwrap_err();
        assert_eq!(err, CoreError::duplicate("taken"));
        assert!(store.find("old").is_some());

        store.rename(id, "new").unwrap();
        assert!(store.find("old").is_none());
        assert_eq!(store.find("new").unwrap().id, id);
        assert_eq!(store.get(id).unwrap().name, "new");
    }

    #[test]
    fn test_rename_destroyed_project_fails() {
        let mut store = ProjectStore::new();
        let id = create(&mut store, Some("work"));
        store.begin_destroy(id);
        assert!(store.rename(id, "other").is_err());
    }
}

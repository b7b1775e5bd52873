//! Guided parameter collection.
//!
//! [`draft`] validates raw inputs; [`session`] is the step machine; this
//! module keeps sessions in memory and runs the side effects the steps
//! need (class lookup, scheme-of-work fetch, generation).

pub mod draft;
pub mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use rph_db::models::LessonPlan;

use crate::error::PlannerError;
use crate::linker;
use crate::pipeline::GenerationContext;

pub use draft::{GenerationDraft, QuestionDraft, SowSelection};
pub use session::{PlannerSession, SowOptions, Step};

type SessionHandle = Arc<tokio::sync::Mutex<PlannerSession>>;

/// Sessions untouched for this long are dropped on the next `create`.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
/// Live sessions per user; creating one more evicts that user's oldest.
pub const MAX_SESSIONS_PER_OWNER: usize = 20;

struct Entry {
    owner_id: Uuid,
    /// Creation order, used to pick the oldest session to evict.
    seq: u64,
    touched: Instant,
    handle: SessionHandle,
}

/// In-memory planner sessions, each owned by the user who created it.
#[derive(Clone)]
pub struct PlannerSessions {
    sessions: Arc<Mutex<HashMap<Uuid, Entry>>>,
    next_seq: Arc<AtomicU64>,
    idle_ttl: Duration,
    per_owner: usize,
}

impl Default for PlannerSessions {
    fn default() -> Self {
        Self::with_limits(SESSION_IDLE_TTL, MAX_SESSIONS_PER_OWNER)
    }
}

impl PlannerSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(idle_ttl: Duration, per_owner: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
            idle_ttl,
            per_owner: per_owner.max(1),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a session, first dropping idle sessions and, if the owner is
    /// at the limit, the owner's oldest.
    pub fn create(&self, owner_id: Uuid) -> PlannerSession {
        let session = PlannerSession::new(owner_id);
        let now = Instant::now();
        let mut map = self.map();

        let before = map.len();
        map.retain(|_, e| now.duration_since(e.touched) < self.idle_ttl);
        let expired = before - map.len();

        let mut owned: Vec<(u64, Uuid)> = map
            .iter()
            .filter(|(_, e)| e.owner_id == owner_id)
            .map(|(id, e)| (e.seq, *id))
            .collect();
        let mut evicted = 0;
        if owned.len() >= self.per_owner {
            owned.sort();
            for (_, id) in &owned[..=owned.len() - self.per_owner] {
                map.remove(id);
                evicted += 1;
            }
        }

        map.insert(
            session.id,
            Entry {
                owner_id,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                touched: now,
                handle: Arc::new(tokio::sync::Mutex::new(session.clone())),
            },
        );
        tracing::debug!(session_id = %session.id, expired, evicted, "planner session created");
        session
    }

    /// Look up a session and mark it as used. Sessions of other users are
    /// reported as absent.
    fn handle(&self, owner_id: Uuid, id: Uuid) -> Result<SessionHandle, PlannerError> {
        let mut map = self.map();
        match map.get_mut(&id) {
            Some(entry) if entry.owner_id == owner_id => {
                entry.touched = Instant::now();
                Ok(Arc::clone(&entry.handle))
            }
            _ => Err(PlannerError::NotFound("planner session".to_string())),
        }
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<PlannerSession, PlannerError> {
        let handle = self.handle(owner_id, id)?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    pub async fn remove(&self, owner_id: Uuid, id: Uuid) -> Result<(), PlannerError> {
        self.handle(owner_id, id)?;
        self.map().remove(&id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge draft fields into a session.
    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        patch: GenerationDraft,
    ) -> Result<PlannerSession, PlannerError> {
        let handle = self.handle(owner_id, id)?;
        let mut session = handle.lock().await;
        session.update(patch)?;
        Ok(session.clone())
    }

    /// Validate the current step and advance.
    ///
    /// Leaving `ChooseClass` loads the chosen class and then the scheme of
    /// work for its grade. A missing scheme of work leaves a notice on the
    /// session; the step change still happens.
    pub async fn next(
        &self,
        ctx: &GenerationContext,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<PlannerSession, PlannerError> {
        let handle = self.handle(owner_id, id)?;
        let mut session = handle.lock().await;

        if session.step() == Step::ChooseClass {
            let errors = session.draft().class_errors();
            if !errors.is_empty() {
                return Err(PlannerError::Validation(errors));
            }
            let class_id = session.draft().class_id.unwrap_or_default();
            match linker::get_class(&ctx.pool, owner_id, class_id).await {
                Ok(class) => session.attach_class(&class),
                Err(PlannerError::NotFound(_)) => {
                    return Err(PlannerError::validation("classId", "class not found"));
                }
                Err(e) => return Err(e),
            }
        }

        let step = session.next()?;
        if step == Step::LessonDetails {
            if let Some(grade) = session.class_grade() {
                let result = linker::get_sow(&ctx.pool, grade).await;
                if let Err(e) = &result {
                    tracing::info!(session_id = %id, %grade, error = %e, "scheme of work unavailable");
                }
                session.set_sow_options(result);
            }
        }
        Ok(session.clone())
    }

    pub async fn prev(&self, owner_id: Uuid, id: Uuid) -> Result<PlannerSession, PlannerError> {
        let handle = self.handle(owner_id, id)?;
        let mut session = handle.lock().await;
        session.prev()?;
        Ok(session.clone())
    }

    /// Generate the lesson plan for a session on `AdditionalInfo`.
    ///
    /// The session lock is released while the provider runs so the session
    /// stays readable; a second generate call for the same session fails
    /// with `GenerationInProgress`.
    pub async fn generate(
        &self,
        ctx: &GenerationContext,
        owner_id: Uuid,
        id: Uuid,
    ) -> Result<(PlannerSession, LessonPlan), PlannerError> {
        let handle = self.handle(owner_id, id)?;
        let _permit = ctx.in_flight().try_acquire(id)?;

        let params = handle.lock().await.begin_generation()?;
        let mut reset = InterruptedGeneration {
            handle: Arc::clone(&handle),
            armed: true,
        };
        let result = ctx.lesson_plan_from_parameters(owner_id, &params).await;
        reset.armed = false;

        let mut session = handle.lock().await;
        match result {
            Ok(plan) => {
                session.finish_generation(Ok(plan.id));
                Ok((session.clone(), plan))
            }
            Err(e) => {
                session.finish_generation(Err(e.public_message()));
                Err(e)
            }
        }
    }
}

/// Returns a session to `AdditionalInfo` if the generate call is dropped
/// while the provider is running.
struct InterruptedGeneration {
    handle: SessionHandle,
    armed: bool,
}

const INTERRUPTED: &str = "Generation was interrupted. Please try again.";

impl Drop for InterruptedGeneration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut session) = self.handle.try_lock() {
            session.finish_generation(Err(INTERRUPTED.to_string()));
            return;
        }
        // Someone else holds the session; reset it once they let go.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = Arc::clone(&self.handle);
                runtime.spawn(async move {
                    handle.lock().await.finish_generation(Err(INTERRUPTED.to_string()));
                });
            }
            Err(_) => tracing::warn!("no runtime to reset an interrupted planner session"),
        }
    }
}

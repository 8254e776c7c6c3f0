use crate::assembler::Contribution;
use crate::component::{Component, StageContext};
use crate::{CoreError, Phase};
use runpack_schema::{Category, CategorySection, ComponentId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Which categories admit at most one participant and which need one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    pub exclusive: BTreeSet<Category>,
    pub required: BTreeSet<Category>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        CategorySection::default().into()
    }
}

impl From<CategorySection> for CategoryRules {
    fn from(section: CategorySection) -> Self {
        Self {
            exclusive: section.exclusive,
            required: section.required,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub parallel: bool,
    pub max_workers: Option<usize>,
}

/// A component that detected itself, with its tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    #[serde(skip)]
    index: usize,
    pub id: ComponentId,
    pub category: Category,
    pub tag: String,
}

/// Outcome of the detect phase, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub participants: Vec<Participant>,
}

impl Detection {
    /// Tags in registration order.
    pub fn tags(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.tag.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Ordered set of components driven through detect, compile and release.
#[derive(Default)]
pub struct Registry {
    components: Vec<Box<dyn Component>>,
    rules: CategoryRules,
}

impl Registry {
    pub fn new(rules: CategoryRules) -> Self {
        Self {
            components: Vec::new(),
            rules,
        }
    }

    pub fn register(&mut self, component: Box<dyn Component>) {
        debug!(
            "registered component {} ({})",
            component.id(),
            component.category()
        );
        self.components.push(component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Run every component's detect and enforce category rules.
    pub fn detect_all(&self) -> Result<Detection, CoreError> {
        let mut participants = Vec::new();
        for (index, component) in self.components.iter().enumerate() {
            let tag = component
                .detect()
                .map_err(|e| e.in_component(component.id(), Phase::Detect))?;
            match tag {
                Some(tag) if !tag.is_empty() => {
                    debug!("{} detected: {tag}", component.id());
                    participants.push(Participant {
                        index,
                        id: component.id().clone(),
                        category: component.category().clone(),
                        tag,
                    });
                }
                _ => debug!("{} does not apply", component.id()),
            }
        }

        let mut by_category: BTreeMap<&Category, Vec<&ComponentId>> = BTreeMap::new();
        for p in &participants {
            by_category.entry(&p.category).or_default().push(&p.id);
        }

        for category in &self.rules.exclusive {
            if let Some(ids) = by_category.get(category) {
                if ids.len() > 1 {
                    return Err(CoreError::Conflict {
                        category: category.clone(),
                        components: ids.iter().map(|id| (*id).clone()).collect(),
                    });
                }
            }
        }

        for category in &self.rules.required {
            if !by_category.contains_key(category) {
                return Err(CoreError::NoApplicableComponent(category.clone()));
            }
        }

        info!(
            "detected {} participating component(s): {}",
            participants.len(),
            participants
                .iter()
                .map(|p| p.tag.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(Detection { participants })
    }

    /// Compile participants. The reported error is the first failure in
    /// registration order, even when compiling in parallel.
    pub fn compile_all(
        &self,
        detection: &Detection,
        ctx: &StageContext<'_>,
        options: CompileOptions,
    ) -> Result<(), CoreError> {
        let participants = &detection.participants;
        let workers = worker_count(participants.len(), options);

        if workers <= 1 {
            for p in participants {
                self.compile_one(p, ctx)?;
            }
            return Ok(());
        }

        debug!("compiling {} components on {workers} workers", participants.len());
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let results: Vec<Mutex<Option<Result<(), CoreError>>>> =
            participants.iter().map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(p) = participants.get(i) else { break };
                    let result = self.compile_one(p, ctx);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    if let Ok(mut slot) = results[i].lock() {
                        *slot = Some(result);
                    }
                });
            }
        });

        // Work is claimed in registration order, so every participant before
        // the first failure has run to completion.
        for slot in results {
            let result = slot
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(Err(e)) = result {
                return Err(e);
            }
        }
        Ok(())
    }

    fn compile_one(&self, p: &Participant, ctx: &StageContext<'_>) -> Result<(), CoreError> {
        let component = &self.components[p.index];
        ctx.cache
            .cancellation()
            .check(p.id.as_str())
            .map_err(CoreError::from)
            .and_then(|()| component.compile(ctx))
            .map_err(|e| e.in_component(&p.id, Phase::Compile))?;
        info!("compiled {}", p.id);
        Ok(())
    }

    /// Collect release fragments from participants in registration order.
    pub fn release_all(&self, detection: &Detection) -> Result<Vec<Contribution>, CoreError> {
        let mut contributions = Vec::new();
        for p in &detection.participants {
            let component = &self.components[p.index];
            if let Some(fragment) = component
                .release()
                .map_err(|e| e.in_component(&p.id, Phase::Release))?
            {
                contributions.push(Contribution {
                    component: p.id.clone(),
                    fragment,
                });
            }
        }

        let mains: Vec<ComponentId> = contributions
            .iter()
            .filter(|c| matches!(c.fragment, crate::ReleaseFragment::Main(_)))
            .map(|c| c.component.clone())
            .collect();
        if mains.len() > 1 {
            return Err(CoreError::MultipleMainCommands(mains));
        }

        Ok(contributions)
    }
}

fn worker_count(jobs: usize, options: CompileOptions) -> usize {
    if !options.parallel {
        return 1;
    }
    let limit = options.max_workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    });
    jobs.min(limit).max(1)
}

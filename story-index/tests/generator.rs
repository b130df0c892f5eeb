//! Index generator behavior: caching, invalidation, ordering and failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use story_index::{
    ExtractError, Extracted, Extractor, FileResolver, IndexGenerationError, IndexerOptions,
    OrderItem, StoryAnnotation, StoryIndexGenerator, StorySort, StorySpecifier,
};
use tempfile::TempDir;

const ROOT: &str = "/project";

/// In-memory files keyed by absolute path; counts extractions per path.
#[derive(Default)]
struct FakeFiles {
    files: Mutex<HashMap<PathBuf, Vec<&'static str>>>,
    calls: Mutex<HashMap<PathBuf, usize>>,
    total: AtomicUsize,
}

impl FakeFiles {
    fn add(&self, rel: &str, exports: Vec<&'static str>) -> PathBuf {
        let path = Path::new(ROOT).join(rel);
        self.files.lock().unwrap().insert(path.clone(), exports);
        path
    }

    fn remove(&self, path: &Path) {
        self.files.lock().unwrap().remove(path);
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn calls(&self, path: &Path) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

struct CountingExtractor(Arc<FakeFiles>);

#[async_trait]
impl Extractor for CountingExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted, ExtractError> {
        self.0.total.fetch_add(1, Ordering::SeqCst);
        *self.0.calls.lock().unwrap().entry(path.to_path_buf()).or_default() += 1;

        let exports = self
            .0
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ExtractError::Parse(format!("no such file {}", path.display())))?;

        Ok(Extracted {
            component: None,
            stories: exports
                .into_iter()
                .map(|export| StoryAnnotation {
                    export_name: export.to_string(),
                    ..Default::default()
                })
                .collect(),
        })
    }
}

/// Lists the fake files in reverse path order, as an unhelpful filesystem might.
struct ReversedResolver(Arc<FakeFiles>);

#[async_trait]
impl FileResolver for ReversedResolver {
    async fn resolve(
        &self,
        _working_dir: &Path,
        _specifier: &StorySpecifier,
    ) -> Result<Vec<PathBuf>, IndexGenerationError> {
        let mut files: Vec<PathBuf> = self.0.files.lock().unwrap().keys().cloned().collect();
        files.sort();
        files.reverse();
        Ok(files)
    }
}

fn specifier() -> StorySpecifier {
    StorySpecifier::from_entry("./src/**/*.stories.*")
}

fn generator(files: &Arc<FakeFiles>, options: IndexerOptions) -> StoryIndexGenerator {
    StoryIndexGenerator::new(vec![specifier()], options)
        .with_extractor(Arc::new(CountingExtractor(Arc::clone(files))))
        .with_resolver(Arc::new(ReversedResolver(Arc::clone(files))))
}

fn ids(index: &story_index::StoryIndex) -> Vec<String> {
    index.ids().map(|id| id.to_string()).collect()
}

fn three_files() -> Arc<FakeFiles> {
    let files = Arc::new(FakeFiles::default());
    files.add("src/a.stories.ts", vec!["One", "Two"]);
    files.add("src/b/c.stories.ts", vec!["One"]);
    files.add("src/d.stories.ts", vec!["One"]);
    files
}

#[tokio::test]
async fn test_repeated_get_index_does_not_re_extract() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));

    gen.initialize().await.unwrap();
    assert_eq!(files.total(), 3);

    gen.get_index().await.unwrap();
    gen.get_index().await.unwrap();
    assert_eq!(files.total(), 3);
}

#[tokio::test]
async fn test_get_index_discovers_on_first_call() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));

    let index = gen.get_index().await.unwrap();
    assert_eq!(ids(&index), vec!["a--one", "a--two", "b-c--one", "d--one"]);
    assert_eq!(files.total(), 3);

    gen.get_index().await.unwrap();
    assert_eq!(files.total(), 3);
}

#[tokio::test]
async fn test_invalidation_re_extracts_only_that_file() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));
    gen.initialize().await.unwrap();

    let changed = files.add("src/b/c.stories.ts", vec!["One", "Extra"]);
    gen.invalidate(&specifier(), &changed, false);
    let index = gen.get_index().await.unwrap();

    assert_eq!(files.total(), 4);
    assert_eq!(files.calls(&changed), 2);
    assert!(index.contains("b-c--extra"));
}

#[tokio::test]
async fn test_discovery_order_is_canonical() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));
    let index = gen.initialize().await.unwrap();

    assert_eq!(ids(&index), vec!["a--one", "a--two", "b-c--one", "d--one"]);
}

#[tokio::test]
async fn test_removal_drops_exactly_that_file() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));
    gen.initialize().await.unwrap();

    let removed = Path::new(ROOT).join("src/a.stories.ts");
    files.remove(&removed);
    gen.invalidate(&specifier(), &removed, true);
    let index = gen.get_index().await.unwrap();

    assert_eq!(ids(&index), vec!["b-c--one", "d--one"]);
    assert_eq!(files.calls(&removed), 1);

    gen.get_index().await.unwrap();
    assert_eq!(files.calls(&removed), 1);
    assert_eq!(files.total(), 3);
}

#[tokio::test]
async fn test_new_file_is_picked_up() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));
    gen.initialize().await.unwrap();

    let created = files.add("src/b.stories.ts", vec!["New"]);
    assert!(gen.invalidate_path(&created, false));
    let index = gen.get_index().await.unwrap();

    assert_eq!(
        ids(&index),
        vec!["a--one", "a--two", "b-c--one", "b--new", "d--one"]
    );
    assert_eq!(files.total(), 4);
}

#[tokio::test]
async fn test_custom_order_list_is_applied_exactly() {
    let files = three_files();
    let sort = StorySort::order(vec![
        OrderItem::from("d"),
        OrderItem::from("b"),
        OrderItem::from("a"),
    ]);
    let mut gen = generator(&files, IndexerOptions::new(ROOT).with_story_sort(sort));
    let index = gen.initialize().await.unwrap();

    assert_eq!(ids(&index), vec!["d--one", "b-c--one", "a--one", "a--two"]);
}

#[tokio::test]
async fn test_sort_is_redone_after_invalidation_without_extraction() {
    let files = three_files();
    let sort = StorySort::custom(|a, b| Ok(b.id.cmp(&a.id)));
    let mut gen = generator(&files, IndexerOptions::new(ROOT).with_story_sort(sort));
    let first = gen.initialize().await.unwrap();
    assert_eq!(ids(&first), vec!["d--one", "b-c--one", "a--two", "a--one"]);

    let removed = Path::new(ROOT).join("src/d.stories.ts");
    gen.invalidate(&specifier(), &removed, true);
    let second = gen.get_index().await.unwrap();
    assert_eq!(ids(&second), vec!["b-c--one", "a--two", "a--one"]);
    assert_eq!(files.total(), 3);
}

#[tokio::test]
async fn test_comparator_failure_is_sort_error() {
    let files = three_files();
    let sort = StorySort::custom(|_, _| Err("comparator exploded".into()));
    let mut gen = generator(&files, IndexerOptions::new(ROOT).with_story_sort(sort));

    let err = gen.initialize().await.unwrap_err();
    assert!(matches!(err, IndexGenerationError::Sort(_)));
    assert!(err.to_string().contains("comparator exploded"));
}

#[tokio::test]
async fn test_duplicate_id_reports_both_files() {
    let files = Arc::new(FakeFiles::default());
    files.add("src/x/button.stories.ts", vec!["Primary"]);
    files.add("src/x-button.stories.ts", vec!["Primary"]);
    let mut gen = generator(&files, IndexerOptions::new(ROOT));

    match gen.initialize().await {
        Err(IndexGenerationError::DuplicateId { id, first, second }) => {
            assert_eq!(id.as_str(), "x-button--primary");
            assert_eq!(first, "./src/x/button.stories.ts");
            assert_eq!(second, "./src/x-button.stories.ts");
        }
        other => panic!("expected duplicate id error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_colliding_exports_in_one_file_fail_the_build() {
    let files = Arc::new(FakeFiles::default());
    files.add("src/button.stories.ts", vec!["Primary", "primary_"]);
    let mut gen = generator(&files, IndexerOptions::new(ROOT));

    match gen.initialize().await {
        Err(IndexGenerationError::DuplicateId { id, first, second }) => {
            assert_eq!(id.as_str(), "button--primary");
            assert_eq!(first, "./src/button.stories.ts");
            assert_eq!(second, "./src/button.stories.ts");
        }
        other => panic!("expected duplicate id error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_overlapping_specifiers_list_a_file_once() {
    let files = three_files();
    let mut gen = StoryIndexGenerator::new(
        vec![specifier(), StorySpecifier::from_entry("./src/*.stories.ts")],
        IndexerOptions::new(ROOT),
    )
    .with_extractor(Arc::new(CountingExtractor(Arc::clone(&files))))
    .with_resolver(Arc::new(ReversedResolver(Arc::clone(&files))));

    let index = gen.initialize().await.unwrap();
    assert_eq!(ids(&index), vec!["a--one", "a--two", "b-c--one", "d--one"]);
}

#[tokio::test]
async fn test_comparator_failing_midway_is_sort_error() {
    let files = Arc::new(FakeFiles::default());
    for i in 0..32 {
        files.add(&format!("src/s{i:02}.stories.ts"), vec!["One"]);
    }
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sort = StorySort::custom(move |a, b| {
        if counter.fetch_add(1, Ordering::SeqCst) == 60 {
            return Err("gave up".into());
        }
        Ok(b.id.cmp(&a.id))
    });
    let mut gen = generator(&files, IndexerOptions::new(ROOT).with_story_sort(sort));

    let err = gen.initialize().await.unwrap_err();
    assert!(matches!(err, IndexGenerationError::Sort(_)));
    assert!(err.to_string().contains("gave up"));
    assert_eq!(calls.load(Ordering::SeqCst), 61);
}

#[tokio::test]
async fn test_empty_project_is_an_error() {
    let files = Arc::new(FakeFiles::default());
    files.add("src/a.stories.ts", vec![]);
    let mut gen = generator(&files, IndexerOptions::new(ROOT));

    assert!(matches!(
        gen.initialize().await,
        Err(IndexGenerationError::EmptyIndex)
    ));
}

#[tokio::test]
async fn test_extract_failure_is_retried_after_fix() {
    let files = three_files();
    let mut gen = generator(&files, IndexerOptions::new(ROOT));
    gen.initialize().await.unwrap();

    let broken = Path::new(ROOT).join("src/a.stories.ts");
    files.remove(&broken);
    gen.invalidate(&specifier(), &broken, false);
    assert!(matches!(
        gen.get_index().await,
        Err(IndexGenerationError::Extract { .. })
    ));
    assert!(gen.previous_index().is_some());

    files.add("src/a.stories.ts", vec!["One"]);
    let index = gen.get_index().await.unwrap();
    assert_eq!(ids(&index), vec!["a--one", "b-c--one", "d--one"]);
}

#[tokio::test]
async fn test_docs_only_entry_on_disk() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(
        src.join("Intro.stories.ts"),
        "export default { title: 'Docs/Intro' };\nexport const __page = {};\n",
    )
    .unwrap();
    std::fs::write(
        src.join("Button.stories.ts"),
        "export default { tags: ['autodocs'] };\nexport const Primary = {};\nexport const Secondary = { name: 'Second' };\n",
    )
    .unwrap();

    let mut gen = StoryIndexGenerator::new(vec![specifier()], IndexerOptions::new(dir.path()));
    let index = gen.initialize().await.unwrap();

    assert_eq!(
        ids(&index),
        vec!["button--primary", "button--secondary", "docs-intro--page"]
    );
    let page = index.get("docs-intro--page").unwrap();
    assert!(page.is_docs_only());
    assert_eq!(page.title, "Docs/Intro");
    let secondary = index.get("button--secondary").unwrap();
    assert_eq!(secondary.name, "Second");
    assert_eq!(secondary.tags, vec!["autodocs"]);
    assert_eq!(secondary.import_path, "./src/Button.stories.ts");
}

#[tokio::test]
async fn test_refresh_detects_changed_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    let file = src.join("Card.stories.ts");
    std::fs::write(&file, "export const A = {};\n").unwrap();

    let mut gen = StoryIndexGenerator::new(vec![specifier()], IndexerOptions::new(dir.path()));
    gen.initialize().await.unwrap();
    assert_eq!(gen.refresh().await, 0);

    std::fs::write(&file, "export const A = {};\nexport const LongerStory = {};\n").unwrap();
    assert_eq!(gen.refresh().await, 1);
    let index = gen.get_index().await.unwrap();
    assert!(index.contains("card--longer-story"));
}

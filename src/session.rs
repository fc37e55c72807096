use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde_json::Value;

use crate::dictionary::CompiledDictionary;
use crate::dom::Document;
use crate::intercept::{HostHttp, ResponseInterceptor, TranslatingInterceptor, Transport, DEFAULT_CONTENT_TYPES};
use crate::ledger::OriginalTextLedger;
use crate::store::KeyValueStore;
use crate::substitute::Mode;
use crate::sweep::{SweepContext, SweepStats, Sweeper, DEFAULT_SKIP_ELEMENTS};
use crate::watcher::MutationWatcher;

pub const MODE_KEY: &str = "ringsdb_translate_mode";

/// State shared between a session and its interceptor.
#[derive(Debug)]
pub struct SessionState {
    mode: Cell<Mode>,
    intercept_enabled: Cell<bool>,
    dictionary: RefCell<Rc<CompiledDictionary>>,
}

impl SessionState {
    /// Starts with the empty dictionary, so nothing is substituted until one is set.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: Cell::new(mode),
            intercept_enabled: Cell::new(mode != Mode::Restore),
            dictionary: RefCell::new(Rc::new(CompiledDictionary::empty())),
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.set(mode);
    }

    #[must_use]
    pub fn intercept_enabled(&self) -> bool {
        self.intercept_enabled.get()
    }

    pub fn set_intercept_enabled(&self, enabled: bool) {
        self.intercept_enabled.set(enabled);
    }

    #[must_use]
    pub fn dictionary(&self) -> Rc<CompiledDictionary> {
        self.dictionary.borrow().clone()
    }

    pub fn set_dictionary(&self, dictionary: CompiledDictionary) {
        *self.dictionary.borrow_mut() = Rc::new(dictionary);
    }
}

/// Mode switch requested by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SourceOnly,
    Annotated,
    Restore,
}

impl Command {
    #[must_use]
    pub fn mode(self) -> Mode {
        match self {
            Command::SourceOnly => Mode::SourceOnly,
            Command::Annotated => Mode::Annotated,
            Command::Restore => Mode::Restore,
        }
    }
}

impl From<Mode> for Command {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::SourceOnly => Command::SourceOnly,
            Mode::Annotated => Command::Annotated,
            Mode::Restore => Command::Restore,
        }
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Mode>().map(Command::from)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.mode(), f)
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Used when no mode has been stored yet or the stored one is unusable.
    pub default_mode: Mode,
    pub skip_elements: Vec<String>,
    pub content_types: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_mode: Mode::default(),
            skip_elements: DEFAULT_SKIP_ELEMENTS.iter().map(|s| s.to_string()).collect(),
            content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One page's translation context: created when the page session starts, torn down
/// when it ends.
pub struct Session<S: KeyValueStore> {
    state: Rc<SessionState>,
    ledger: OriginalTextLedger,
    watcher: MutationWatcher,
    sweeper: Sweeper,
    interceptor: Rc<TranslatingInterceptor>,
    store: S,
}

impl<S: KeyValueStore> Session<S> {
    /// Restores the persisted mode (falling back to `options.default_mode`) and installs
    /// `dictionary`.
    pub fn start(store: S, dictionary: CompiledDictionary, options: SessionOptions) -> Self {
        let mode = load_mode(&store, options.default_mode);
        log::info!("translation mode loaded: {mode}");
        let state = Rc::new(SessionState::new(mode));
        state.set_dictionary(dictionary);
        let interceptor = Rc::new(TranslatingInterceptor::new(state.clone(), options.content_types));
        Self {
            state,
            ledger: OriginalTextLedger::new(),
            watcher: MutationWatcher::new(),
            sweeper: Sweeper::new(options.skip_elements),
            interceptor,
            store,
        }
    }

    #[must_use]
    pub fn state(&self) -> &Rc<SessionState> {
        &self.state
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    #[must_use]
    pub fn ledger(&self) -> &OriginalTextLedger {
        &self.ledger
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn watcher_installed(&self) -> bool {
        self.watcher.is_installed()
    }

    pub fn set_dictionary(&self, dictionary: CompiledDictionary) {
        self.state.set_dictionary(dictionary);
    }

    /// The session's interceptor. Always the same instance, so registering it twice is a no-op.
    #[must_use]
    pub fn interceptor(&self) -> Rc<dyn ResponseInterceptor> {
        self.interceptor.clone()
    }

    pub fn install_interception<T: Transport>(&self, http: &mut HostHttp<T>) -> bool {
        http.register_interceptor(self.interceptor())
    }

    /// Initial pass once the page has loaded: translate with the current mode and start
    /// watching for changes.
    pub fn attach(&mut self, doc: &mut Document) -> SweepStats {
        let command = Command::from(self.mode());
        self.apply(doc, command)
    }

    /// Persists the new mode, gates interception, re-sweeps the whole document and makes
    /// sure the watcher is running.
    pub fn apply(&mut self, doc: &mut Document, command: Command) -> SweepStats {
        let mode = command.mode();
        self.state.set_mode(mode);
        save_mode(&mut self.store, mode);
        self.state.set_intercept_enabled(mode != Mode::Restore);

        let dict = self.state.dictionary();
        let root = doc.body();
        let mut stats = {
            let mut cx = SweepContext {
                dict: &dict,
                ledger: &mut self.ledger,
                mode,
            };
            self.sweeper.sweep(doc, root, &mut cx)
        };
        self.watcher.install(doc, root);
        let settled = self.pump(doc);
        stats.visited += settled.visited;
        stats.written += settled.written;
        log::info!(
            "translation mode switched to {mode}: {} text nodes, {} rewritten",
            stats.visited,
            stats.written
        );
        stats
    }

    /// Handles queued document mutations with the current mode.
    pub fn pump(&mut self, doc: &mut Document) -> SweepStats {
        let dict = self.state.dictionary();
        let mut cx = SweepContext {
            dict: &dict,
            ledger: &mut self.ledger,
            mode: self.state.mode(),
        };
        self.watcher.drain(doc, &self.sweeper, &mut cx)
    }

    /// Page is going away: stop watching and forget every original.
    pub fn teardown(&mut self, doc: &mut Document) {
        self.watcher.uninstall(doc);
        self.ledger.clear();
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

fn load_mode(store: &impl KeyValueStore, fallback: Mode) -> Mode {
    match store.get(MODE_KEY) {
        Ok(Some(Value::String(s))) => s.parse().unwrap_or_else(|err| {
            log::warn!("ignoring stored mode: {err:#}");
            fallback
        }),
        Ok(Some(other)) => {
            log::warn!("ignoring stored mode of unexpected shape: {other}");
            fallback
        }
        Ok(None) => fallback,
        Err(err) => {
            log::error!("failed to load translation mode: {err:#}");
            fallback
        }
    }
}

/// Reads the stored mode without starting a session.
pub fn stored_mode(store: &impl KeyValueStore) -> anyhow::Result<Option<Mode>> {
    match store.get(MODE_KEY)? {
        Some(Value::String(s)) => Ok(Some(s.parse()?)),
        Some(other) => Err(anyhow::anyhow!("stored mode is not a string: {other}")),
        None => Ok(None),
    }
}

/// Persists `mode` for the next session.
pub fn store_mode(store: &mut impl KeyValueStore, mode: Mode) -> anyhow::Result<()> {
    store.set(MODE_KEY, Value::String(mode.as_str().to_string()))
}

fn save_mode(store: &mut impl KeyValueStore, mode: Mode) {
    if let Err(err) = store_mode(store, mode) {
        log::error!("failed to save translation mode: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TermDictionary;
    use crate::dom::parse_xhtml;
    use crate::intercept::{HttpRequest, HttpResponse};
    use crate::store::MemoryStore;
    use anyhow::anyhow;
    use serde_json::json;

    fn gandalf() -> CompiledDictionary {
        CompiledDictionary::compile([("Gandalf", "甘道夫")].into_iter().collect::<TermDictionary>())
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<Value>> {
            Err(anyhow!("storage unavailable"))
        }

        fn set(&mut self, _key: &str, _value: Value) -> anyhow::Result<()> {
            Err(anyhow!("storage unavailable"))
        }

        fn remove(&mut self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow!("storage unavailable"))
        }
    }

    #[test]
    fn gandalf_end_to_end() {
        let mut doc = parse_xhtml("<html><body><p>Gandalf arrives</p></body></html>").expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        let body = doc.body();

        session.attach(&mut doc);
        assert_eq!(doc.text_content(body), "甘道夫 arrives");

        session.apply(&mut doc, Command::Annotated);
        assert_eq!(doc.text_content(body), "Gandalf (甘道夫) arrives");

        session.apply(&mut doc, Command::Restore);
        assert_eq!(doc.text_content(body), "Gandalf arrives");
    }

    #[test]
    fn restore_recovers_original_after_many_switches() {
        let src = "<body><h1>Gandalf</h1><p>Gandalf (the Grey) and Gandalf</p><script>Gandalf()</script></body>";
        let mut doc = parse_xhtml(src).expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        for command in [
            Command::SourceOnly,
            Command::Annotated,
            Command::Annotated,
            Command::SourceOnly,
            Command::Annotated,
        ] {
            session.apply(&mut doc, command);
        }
        session.apply(&mut doc, Command::Restore);
        assert_eq!(crate::dom::write_xhtml(&doc).expect("write"), src);
    }

    #[test]
    fn mode_is_persisted_and_reloaded() {
        let mut doc = parse_xhtml("<body><p>Gandalf</p></body>").expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        assert_eq!(session.mode(), Mode::SourceOnly);
        session.apply(&mut doc, Command::Annotated);
        let store = session.into_store();
        assert_eq!(store.get(MODE_KEY).expect("get"), Some(json!("bilingual")));

        let session = Session::start(store, gandalf(), SessionOptions::default());
        assert_eq!(session.mode(), Mode::Annotated);
    }

    #[test]
    fn unreadable_or_unknown_mode_falls_back_to_default() {
        let session = Session::start(BrokenStore, gandalf(), SessionOptions::default());
        assert_eq!(session.mode(), Mode::SourceOnly);

        let mut store = MemoryStore::new();
        store.set(MODE_KEY, json!("elvish")).expect("set");
        let session = Session::start(store, gandalf(), SessionOptions::default());
        assert_eq!(session.mode(), Mode::SourceOnly);

        let options = SessionOptions {
            default_mode: Mode::Annotated,
            ..SessionOptions::default()
        };
        let session = Session::start(MemoryStore::new(), gandalf(), options);
        assert_eq!(session.mode(), Mode::Annotated);
        assert_eq!(stored_mode(session.store()).expect("read"), None);
    }

    #[test]
    fn failed_save_keeps_the_in_memory_mode() {
        let mut doc = parse_xhtml("<body><p>Gandalf</p></body>").expect("parse");
        let mut session = Session::start(BrokenStore, gandalf(), SessionOptions::default());
        session.apply(&mut doc, Command::Annotated);
        assert_eq!(session.mode(), Mode::Annotated);
        assert_eq!(doc.text_content(doc.root()), "Gandalf (甘道夫)");
    }

    #[test]
    fn watcher_translates_late_content_with_current_mode() {
        let mut doc = parse_xhtml("<body><div id=\"list\"></div></body>").expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        assert!(!session.watcher_installed());
        session.apply(&mut doc, Command::Annotated);
        assert!(session.watcher_installed());

        let list = doc.find_element(doc.root(), "div").expect("div");
        let row = doc.create_element("span", Vec::new());
        let text = doc.create_text("Gandalf");
        doc.append_child(row, text).expect("append");
        doc.append_child(list, row).expect("append");
        session.pump(&mut doc);
        assert_eq!(doc.text_content(list), "Gandalf (甘道夫)");

        session.apply(&mut doc, Command::Restore);
        assert_eq!(doc.text_content(list), "Gandalf");
    }

    #[test]
    fn text_filled_in_after_attach_is_translated_not_erased() {
        let mut doc = parse_xhtml("<body><span></span></body>").expect("parse");
        let span = doc.find_element(doc.root(), "span").expect("span");
        let text = doc.create_text("");
        doc.append_child(span, text).expect("append");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        session.attach(&mut doc);
        assert_eq!(doc.text(text), Some(""));

        doc.set_text(text, "Gandalf arrives").expect("fill");
        session.pump(&mut doc);
        assert_eq!(doc.text(text), Some("甘道夫 arrives"));

        session.apply(&mut doc, Command::Restore);
        assert_eq!(doc.text(text), Some("Gandalf arrives"));
    }

    #[test]
    fn edits_outside_body_are_left_alone() {
        let mut doc =
            parse_xhtml("<html><head><title>Gandalf</title></head><body><p>Gandalf</p></body></html>").expect("parse");
        let title = doc.find_element(doc.root(), "title").expect("title");
        let title_text = doc.children(title)[0];
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        session.attach(&mut doc);
        assert_eq!(doc.text(title_text), Some("Gandalf"));

        doc.set_text(title_text, "Gandalf returns").expect("set");
        session.pump(&mut doc);
        assert_eq!(doc.text(title_text), Some("Gandalf returns"));
        assert_eq!(doc.text_content(doc.body()), "甘道夫");
    }

    #[test]
    fn commands_gate_interception() {
        let mut doc = parse_xhtml("<body></body>").expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        let mut http = HostHttp::new(|_: &HttpRequest| -> anyhow::Result<HttpResponse> {
            Ok(HttpResponse::new(200, "application/json", r#"["Gandalf"]"#))
        });
        assert!(session.install_interception(&mut http));
        assert!(!session.install_interception(&mut http));

        session.attach(&mut doc);
        let got = http.fetch(HttpRequest::get("/cards")).expect("fetch");
        assert_eq!(got.text(), r#"["甘道夫"]"#);

        session.apply(&mut doc, Command::Restore);
        assert!(!session.state().intercept_enabled());
        let got = http.fetch(HttpRequest::get("/cards")).expect("fetch");
        assert_eq!(got.text(), r#"["Gandalf"]"#);
    }

    #[test]
    fn missing_dictionary_is_passthrough_until_loaded() {
        let mut doc = parse_xhtml("<body><p>Gandalf</p></body>").expect("parse");
        let mut session =
            Session::start(MemoryStore::new(), CompiledDictionary::empty(), SessionOptions::default());
        session.attach(&mut doc);
        assert_eq!(doc.text_content(doc.root()), "Gandalf");

        session.set_dictionary(gandalf());
        session.apply(&mut doc, Command::SourceOnly);
        assert_eq!(doc.text_content(doc.root()), "甘道夫");
    }

    #[test]
    fn teardown_clears_ledger_and_stops_watching() {
        let mut doc = parse_xhtml("<body><p>Gandalf</p></body>").expect("parse");
        let mut session = Session::start(MemoryStore::new(), gandalf(), SessionOptions::default());
        session.attach(&mut doc);
        assert_eq!(session.ledger().len(), 1);
        session.teardown(&mut doc);
        assert!(session.ledger().is_empty());
        assert!(!doc.is_observed());
    }

    #[test]
    fn commands_parse_from_wire_names() {
        assert_eq!("zh_only".parse::<Command>().expect("parse"), Command::SourceOnly);
        assert_eq!("bilingual".parse::<Command>().expect("parse"), Command::Annotated);
        assert_eq!("restore".parse::<Command>().expect("parse"), Command::Restore);
        assert!("translate".parse::<Command>().is_err());
    }
}

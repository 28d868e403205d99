//! Built-in actions usable from recipe files.
//!
//! Each built-in is a plain async function over [`Args`]; the registry maps
//! the `uses:` name to it.

pub mod editor;
pub mod email;
pub mod fs;
pub mod git;
pub mod open;
pub mod process;
pub mod time;

use crate::core::error::ActionError;
use crate::core::session::ActionSession;
use crate::core::types::{ActionOutput, Args};
use futures::future::BoxFuture;
use indexmap::IndexMap;

/// Entry point of a built-in action.
pub type BuiltinFn = fn(Args, ActionSession) -> BoxFuture<'static, Result<ActionOutput, ActionError>>;

/// A registered built-in action.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub summary: &'static str,
    pub run: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .finish()
    }
}

/// Name → built-in lookup used when building recipes from files.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: IndexMap<&'static str, Builtin>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action shipped with markten.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for builtin in [
            Builtin {
                name: "process.run",
                summary: "run a program to completion, logging its output",
                run: |a, s| Box::pin(process::run(a, s)),
            },
            Builtin {
                name: "process.spawn",
                summary: "start a background program, interrupted at teardown",
                run: |a, s| Box::pin(process::spawn(a, s)),
            },
            Builtin {
                name: "fs.temp_dir",
                summary: "create a temporary directory, removed at teardown",
                run: |a, s| Box::pin(fs::temp_dir(a, s)),
            },
            Builtin {
                name: "fs.write_file",
                summary: "write text to a file",
                run: |a, s| Box::pin(fs::write_file(a, s)),
            },
            Builtin {
                name: "fs.read_file",
                summary: "read a file as text",
                run: |a, s| Box::pin(fs::read_file(a, s)),
            },
            Builtin {
                name: "git.clone",
                summary: "clone a repository, optionally checking out a branch",
                run: |a, s| Box::pin(git::clone(a, s)),
            },
            Builtin {
                name: "git.checkout",
                summary: "switch branch in a repository",
                run: |a, s| Box::pin(git::checkout(a, s)),
            },
            Builtin {
                name: "git.add",
                summary: "stage files",
                run: |a, s| Box::pin(git::add(a, s)),
            },
            Builtin {
                name: "git.commit",
                summary: "commit staged changes, optionally pushing",
                run: |a, s| Box::pin(git::commit(a, s)),
            },
            Builtin {
                name: "git.push",
                summary: "push the current branch",
                run: |a, s| Box::pin(git::push(a, s)),
            },
            Builtin {
                name: "git.pull",
                summary: "pull the current branch",
                run: |a, s| Box::pin(git::pull(a, s)),
            },
            Builtin {
                name: "editor.vs_code",
                summary: "open paths in a new VS Code window and wait for it",
                run: |a, s| Box::pin(editor::vs_code(a, s)),
            },
            Builtin {
                name: "editor.zed",
                summary: "open paths in Zed and wait for it",
                run: |a, s| Box::pin(editor::zed(a, s)),
            },
            Builtin {
                name: "email.compose",
                summary: "open a pre-filled email in the default mail client",
                run: |a, s| Box::pin(email::compose(a, s)),
            },
            Builtin {
                name: "open",
                summary: "open a file or URL with the system opener",
                run: |a, s| Box::pin(open::open(a, s)),
            },
            Builtin {
                name: "webbrowser.open",
                summary: "open a URL in the default browser",
                run: |a, s| Box::pin(open::webbrowser(a, s)),
            },
            Builtin {
                name: "time.sleep",
                summary: "wait for a number of seconds",
                run: |a, s| Box::pin(time::sleep(a, s)),
            },
        ] {
            registry.register(builtin);
        }
        registry
    }

    /// Add or replace a built-in.
    pub fn register(&mut self, builtin: Builtin) {
        self.actions.insert(builtin.name, builtin);
    }

    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Builtin> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// src/core/project.rs

//! Project discovery and loading.
//!
//! A base directory holds `Projects/<Name>/script.project` roots. Loading is
//! two-staged: stage 1 parses (or cache-loads) every discovered script in
//! parallel, stage 2 resolves link scripts to their targets. Afterward each
//! project's scripts are sorted into their deterministic tree order.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use walkdir::WalkDir;

use crate::constants;
use crate::core::cache::{CacheError, CachePool, ScriptCache};
use crate::core::ini;
use crate::core::script::{Script, ScriptError, ScriptType};
use crate::models::{
    normalize_separators, path_eq_ignore_case, path_key, CompatOption, LogInfo, LogState,
    ScriptParseInfo, SelectedState,
};

/// How `load_script_runtime` interacts with the project tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadScriptRuntimeOptions {
    pub ignore_main: bool,
    pub add_to_project_tree: bool,
    pub overwrite_to_project_tree: bool,
}

// --- PROJECT ---

pub struct Project {
    project_name: String,
    base_dir: PathBuf,
    project_root: PathBuf,
    project_dir: PathBuf,
    compat: CompatOption,
    /// Directory entries discovered during scanning, consulted when the tree
    /// sort needs a directory node's real path and dir-link flag.
    dir_entries: Vec<ScriptParseInfo>,
    all_scripts: Vec<Script>,
    main_script_idx: Option<usize>,
}

impl Project {
    pub fn new(project_name: &str, base_dir: &Path, compat: CompatOption) -> Self {
        let project_root = base_dir.join(constants::PROJECTS_DIR);
        let project_dir = project_root.join(project_name);
        Self {
            project_name: project_name.to_string(),
            base_dir: base_dir.to_path_buf(),
            project_root,
            project_dir,
            compat,
            dir_entries: Vec::new(),
            all_scripts: Vec::new(),
            main_script_idx: None,
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn compat(&self) -> &CompatOption {
        &self.compat
    }

    pub fn main_script_path(&self) -> PathBuf {
        self.project_dir.join(constants::MAIN_SCRIPT_FILENAME)
    }

    pub fn all_scripts(&self) -> &[Script] {
        &self.all_scripts
    }

    pub fn is_loaded(&self) -> bool {
        self.main_script_idx.is_some()
    }

    pub fn main_script(&self) -> Option<&Script> {
        self.main_script_idx.and_then(|idx| self.all_scripts.get(idx))
    }

    pub fn set_dir_entries(&mut self, dir_entries: Vec<ScriptParseInfo>) {
        self.dir_entries = dir_entries;
    }

    /// Whether path-related settings may be changed, an opt-out carried in
    /// the main script's `[Main] PathSetting=` key.
    pub fn is_path_setting_enabled(&self) -> bool {
        let Some(main) = self.main_script() else {
            return true;
        };
        ini::get_ci(main.main_info(), "PathSetting")
            .map_or(true, |v| !v.eq_ignore_ascii_case("False"))
    }

    // --- STAGE 1: PARALLEL SCRIPT LOAD ---

    /// Loads every non-directory parse entry, cache-first when a pool is
    /// given. Per-script failures degrade to diagnostics.
    pub fn load_scripts(
        &mut self,
        spis: &[ScriptParseInfo],
        pool: Option<&CachePool>,
    ) -> Vec<LogInfo> {
        let main_path = self.main_script_path();
        let loaded: Mutex<Vec<Script>> = Mutex::new(Vec::with_capacity(spis.len()));
        let logs: Mutex<Vec<LogInfo>> = Mutex::new(Vec::new());

        spis.par_iter().filter(|spi| !spi.is_dir).for_each(|spi| {
            match Self::load_one(spi, &main_path, pool) {
                Ok(sc) => loaded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(sc),
                Err(e) => logs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(LogInfo::new(
                        LogState::Error,
                        format!(
                            "Unable to load script [{}]: {e}",
                            spi.real_path.display()
                        ),
                    )),
            }
        });

        self.all_scripts = loaded.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut logs = logs.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mains: Vec<usize> = self
            .all_scripts
            .iter()
            .enumerate()
            .filter(|(_, sc)| sc.is_main_script())
            .map(|(i, _)| i)
            .collect();
        assert!(
            mains.len() <= 1,
            "project [{}] has more than one main script",
            self.project_name
        );
        match mains.first() {
            Some(&idx) => self.main_script_idx = Some(idx),
            None => logs.push(LogInfo::new(
                LogState::CriticalError,
                format!(
                    "Unable to load project [{}]: main script is missing or invalid",
                    self.project_name
                ),
            )),
        }
        logs
    }

    fn load_one(
        spi: &ScriptParseInfo,
        main_path: &Path,
        pool: Option<&CachePool>,
    ) -> Result<Script, ScriptError> {
        if let Some(pool) = pool {
            if let Some(mut sc) = pool.deserialize_script(&spi.real_path) {
                sc.set_tree_path(spi.tree_path.clone());
                sc.set_is_dir_link(spi.is_dir_link);
                log::debug!("cache hit [{}]", spi.real_path.display());
                return Ok(sc);
            }
        }
        let is_main = path_eq_ignore_case(&spi.real_path, main_path);
        let script_type = if spi
            .real_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(constants::LINK_EXT))
        {
            ScriptType::Link
        } else {
            ScriptType::Script
        };
        Script::load(
            script_type,
            &spi.real_path,
            &spi.tree_path,
            None,
            is_main,
            false,
            spi.is_dir_link,
        )
    }

    // --- STAGE 2 SUPPORT: LINK RESOLUTION (driven by the collection) ---

    /// Resolves every link script in parallel, collapsing link chains to a
    /// single hop. Unresolvable links are removed from the project.
    pub fn load_links(&mut self, pool: Option<&CachePool>) -> Vec<LogInfo> {
        let link_idxs: Vec<usize> = self
            .all_scripts
            .iter()
            .enumerate()
            .filter(|(_, sc)| sc.script_type() == ScriptType::Link && !sc.link_loaded())
            .map(|(i, _)| i)
            .collect();
        if link_idxs.is_empty() {
            return Vec::new();
        }

        let base_dir = self.base_dir.clone();
        let scripts = &self.all_scripts;
        let results: Mutex<Vec<(usize, Result<Script, String>)>> =
            Mutex::new(Vec::with_capacity(link_idxs.len()));
        link_idxs.par_iter().for_each(|&idx| {
            let resolved = Self::resolve_link_target(&scripts[idx], &base_dir, pool);
            results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((idx, resolved));
        });

        let mut logs = Vec::new();
        let mut remove: Vec<usize> = Vec::new();
        for (idx, resolved) in results.into_inner().unwrap_or_else(PoisonError::into_inner) {
            match resolved {
                Ok(target) => self.all_scripts[idx].set_link(target),
                Err(message) => {
                    logs.push(LogInfo::new(
                        LogState::Error,
                        format!(
                            "Unable to load linked script [{}]: {message}",
                            self.all_scripts[idx].real_path().display()
                        ),
                    ));
                    remove.push(idx);
                }
            }
        }
        remove.sort_unstable_by(|a, b| b.cmp(a));
        for idx in remove {
            self.all_scripts.remove(idx);
        }
        // Removals shift indices, so locate the main script again.
        self.main_script_idx = self
            .all_scripts
            .iter()
            .position(Script::is_main_script);
        logs
    }

    /// Walks a link chain until a real script is found. Bounded by a visited
    /// set and a hard depth limit so cyclic or runaway chains terminate.
    fn resolve_link_target(
        sc: &Script,
        base_dir: &Path,
        pool: Option<&CachePool>,
    ) -> Result<Script, String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(path_key(sc.real_path()));
        let mut raw = ini::get_ci(sc.main_info(), "Link")
            .cloned()
            .ok_or_else(|| "no Link key".to_string())?;

        for _ in 0..constants::MAX_LINK_DEPTH {
            let real = resolve_link_path(&raw, base_dir);
            if !real.is_file() {
                return Err(format!("link path [{}] does not exist", real.display()));
            }
            if !visited.insert(path_key(&real)) {
                return Err(format!("cyclic link chain at [{}]", real.display()));
            }

            let target = match pool.and_then(|p| p.deserialize_script(&real)) {
                Some(mut cached) => {
                    cached.set_tree_path(sc.tree_path().to_path_buf());
                    cached.set_is_dir_link(sc.is_dir_link());
                    cached
                }
                None => {
                    let script_type = if real
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(constants::LINK_EXT))
                    {
                        ScriptType::Link
                    } else {
                        ScriptType::Script
                    };
                    Script::load(
                        script_type,
                        &real,
                        sc.tree_path(),
                        None,
                        false,
                        false,
                        sc.is_dir_link(),
                    )
                    .map_err(|e| e.to_string())?
                }
            };

            if target.script_type() == ScriptType::Script {
                return Ok(target);
            }
            raw = ini::get_ci(target.main_info(), "Link")
                .cloned()
                .ok_or_else(|| format!("no Link key in [{}]", real.display()))?;
        }
        Err(format!(
            "link chain deeper than {} levels",
            constants::MAX_LINK_DEPTH
        ))
    }

    // --- SORT ---

    /// Rebuilds the deterministic tree order: a k-ary tree rooted at the
    /// main script, siblings ordered by (level, scripts-before-directories,
    /// case-insensitive real path), flattened in DFS preorder. Missing
    /// directory nodes are synthesized on demand.
    pub fn post_load(&mut self) {
        if self.main_script_idx.is_none() {
            return;
        }
        self.sort_scripts();
        self.main_script_idx = self
            .all_scripts
            .iter()
            .position(Script::is_main_script);
    }

    fn sort_scripts(&mut self) {
        struct Node {
            script: Option<Script>,
            children: Vec<usize>,
        }

        let scripts = std::mem::take(&mut self.all_scripts);
        let mut main = None;
        let mut others = Vec::new();
        for sc in scripts {
            // Directory nodes are synthesized from scratch on every sort, so
            // a re-sort never carries the previous run's nodes as leaves.
            if sc.script_type() == ScriptType::Directory {
                continue;
            }
            if sc.is_main_script() && main.is_none() {
                main = Some(sc);
            } else {
                others.push(sc);
            }
        }
        let Some(main) = main else {
            self.all_scripts = others;
            return;
        };

        let mut arena: Vec<Node> = vec![Node {
            script: Some(main),
            children: Vec::new(),
        }];
        // Keyed by (level, path) so the node a script hangs under does not
        // depend on which sibling the parallel load finished first.
        let mut dir_nodes: HashMap<(i32, String), usize> = HashMap::new();

        for sc in others {
            let comps: Vec<String> = sc
                .tree_path()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if comps.is_empty() {
                continue;
            }
            let mut parent = 0usize;
            let mut acc = PathBuf::from(&comps[0]);
            for comp in comps.iter().take(comps.len().saturating_sub(1)).skip(1) {
                acc.push(comp);
                let key = (sc.level(), path_key(&acc));
                if let Some(&idx) = dir_nodes.get(&key) {
                    parent = idx;
                    continue;
                }
                let (real, is_dir_link) = self
                    .dir_entries
                    .iter()
                    .find(|d| d.is_dir && path_eq_ignore_case(&d.tree_path, &acc))
                    .map(|d| (d.real_path.clone(), d.is_dir_link))
                    .unwrap_or_else(|| (self.project_root.join(&acc), false));
                let dir_script = Script::directory(&real, &acc, sc.level(), is_dir_link);
                arena.push(Node {
                    script: Some(dir_script),
                    children: Vec::new(),
                });
                let idx = arena.len() - 1;
                arena[parent].children.push(idx);
                dir_nodes.insert(key, idx);
                parent = idx;
            }
            arena.push(Node {
                script: Some(sc),
                children: Vec::new(),
            });
            let idx = arena.len() - 1;
            arena[parent].children.push(idx);
        }

        fn compare(a: &Script, b: &Script) -> std::cmp::Ordering {
            a.level()
                .cmp(&b.level())
                .then_with(|| {
                    let a_dir = a.script_type() == ScriptType::Directory;
                    let b_dir = b.script_type() == ScriptType::Directory;
                    a_dir.cmp(&b_dir)
                })
                .then_with(|| path_key(a.real_path()).cmp(&path_key(b.real_path())))
        }

        fn sort_children(arena: &mut [Node], idx: usize) {
            let mut children = std::mem::take(&mut arena[idx].children);
            children.sort_by(|&a, &b| {
                let (sa, sb) = (&arena[a].script, &arena[b].script);
                match (sa, sb) {
                    (Some(sa), Some(sb)) => compare(sa, sb),
                    _ => std::cmp::Ordering::Equal,
                }
            });
            for &child in &children {
                sort_children(arena, child);
            }
            arena[idx].children = children;
        }

        fn flatten(arena: &mut [Node], idx: usize, out: &mut Vec<Script>) {
            if let Some(sc) = arena[idx].script.take() {
                out.push(sc);
            }
            let children = std::mem::take(&mut arena[idx].children);
            for child in children {
                flatten(arena, child, out);
            }
        }

        sort_children(&mut arena, 0);
        let mut out = Vec::with_capacity(arena.len());
        flatten(&mut arena, 0, &mut out);
        self.all_scripts = out;
    }

    // --- LOOKUPS AND FILTERED VIEWS ---

    pub fn get_script_by_real_path(&self, real_path: &Path) -> Option<&Script> {
        self.all_scripts
            .iter()
            .find(|sc| path_eq_ignore_case(sc.real_path(), real_path))
    }

    pub fn get_script_by_tree_path(&self, tree_path: &Path) -> Option<&Script> {
        self.all_scripts
            .iter()
            .find(|sc| path_eq_ignore_case(sc.tree_path(), tree_path))
    }

    pub fn contains_script_by_real_path(&self, real_path: &Path) -> bool {
        self.get_script_by_real_path(real_path).is_some()
    }

    pub fn contains_script_by_tree_path(&self, tree_path: &Path) -> bool {
        self.get_script_by_tree_path(tree_path).is_some()
    }

    /// Scripts participating in a build: the main script plus everything
    /// mandatory or selected.
    pub fn active_scripts(&self) -> Vec<&Script> {
        self.all_scripts
            .iter()
            .filter(|sc| {
                sc.script_type() != ScriptType::Directory
                    && (sc.is_main_script()
                        || sc.mandatory()
                        || sc.selected() == SelectedState::True)
            })
            .collect()
    }

    /// Scripts shown in the tree: level 0 entries are hidden helpers.
    pub fn visible_scripts(&self) -> Vec<&Script> {
        self.all_scripts
            .iter()
            .filter(|sc| sc.is_main_script() || sc.level() > 0)
            .collect()
    }

    // --- RUNTIME MUTATION ---

    /// Reloads one script from disk, bypassing the cache. Link scripts lose
    /// their resolved target and must go through link resolution again.
    pub fn refresh_script(&mut self, tree_path: &Path) -> Result<bool, ScriptError> {
        let Some(idx) = self
            .all_scripts
            .iter()
            .position(|sc| path_eq_ignore_case(sc.tree_path(), tree_path))
        else {
            return Ok(false);
        };
        let old = &self.all_scripts[idx];
        if old.script_type() == ScriptType::Directory {
            return Ok(false);
        }
        let fresh = Script::load(
            old.script_type(),
            old.real_path(),
            old.tree_path(),
            None,
            old.is_main_script(),
            false,
            old.is_dir_link(),
        )?;
        self.all_scripts[idx] = fresh;
        Ok(true)
    }

    /// Loads a script outside the regular scan, optionally inserting it into
    /// the tree. An empty tree path marks a transient script that is never
    /// added. A tree-path collision with a different source file is an error
    /// unless overwrite is requested.
    pub fn load_script_runtime(
        &mut self,
        real_path: &Path,
        tree_path: &Path,
        options: &LoadScriptRuntimeOptions,
    ) -> Result<Script, ScriptError> {
        let script_type = if real_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(constants::LINK_EXT))
        {
            ScriptType::Link
        } else {
            ScriptType::Script
        };
        let sc = Script::load(
            script_type,
            real_path,
            tree_path,
            None,
            false,
            options.ignore_main,
            false,
        )?;

        if options.add_to_project_tree && !tree_path.as_os_str().is_empty() {
            match self
                .all_scripts
                .iter()
                .position(|existing| path_eq_ignore_case(existing.tree_path(), tree_path))
            {
                Some(idx) => {
                    let same_source =
                        path_eq_ignore_case(self.all_scripts[idx].real_path(), real_path);
                    if !same_source && !options.overwrite_to_project_tree {
                        return Err(ScriptError::TreePathCollision(tree_path.to_path_buf()));
                    }
                    self.all_scripts[idx] = sc.clone();
                }
                None => {
                    self.all_scripts.push(sc.clone());
                    self.sort_scripts();
                }
            }
        }
        Ok(sc)
    }
}

// --- PROJECT COLLECTION ---

pub struct ProjectCollection {
    base_dir: PathBuf,
    project_root: PathBuf,
    project_names: Vec<String>,
    compat_dict: HashMap<String, CompatOption>,
    spi_dict: HashMap<String, Vec<ScriptParseInfo>>,
    dpi_dict: HashMap<String, Vec<ScriptParseInfo>>,
    /// Diagnostics produced during `prepare_load`, handed over by the next
    /// `load` call.
    pending_logs: Vec<LogInfo>,
    projects: Vec<Project>,
    fully_loaded: bool,
}

impl ProjectCollection {
    /// Scans `base_dir/Projects` for project roots and their compat options.
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = dunce::canonicalize(base_dir)
            .with_context(|| format!("invalid base directory [{}]", base_dir.display()))?;
        let mut collection = Self {
            project_root: base_dir.join(constants::PROJECTS_DIR),
            base_dir,
            project_names: Vec::new(),
            compat_dict: HashMap::new(),
            spi_dict: HashMap::new(),
            dpi_dict: HashMap::new(),
            pending_logs: Vec::new(),
            projects: Vec::new(),
            fully_loaded: false,
        };
        collection.refresh_project_entries()?;
        Ok(collection)
    }

    /// Re-discovers project names and compat options. Clears any loaded
    /// state.
    pub fn refresh_project_entries(&mut self) -> Result<()> {
        self.project_names.clear();
        self.compat_dict.clear();
        self.spi_dict.clear();
        self.dpi_dict.clear();
        self.pending_logs.clear();
        self.projects.clear();
        self.fully_loaded = false;

        if !self.project_root.is_dir() {
            bail!(
                "base directory has no [{}] directory: [{}]",
                constants::PROJECTS_DIR,
                self.base_dir.display()
            );
        }
        for entry in fs::read_dir(&self.project_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let project_dir = entry.path();
            if !project_dir.join(constants::MAIN_SCRIPT_FILENAME).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let compat = CompatOption::from_file(&project_dir.join(constants::COMPAT_FILENAME))
                .with_context(|| format!("invalid compat options of project [{name}]"))?;
            self.compat_dict.insert(name.to_lowercase(), compat);
            self.project_names.push(name);
        }
        self.project_names
            .sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        Ok(())
    }

    pub fn project_names(&self) -> &[String] {
        &self.project_names
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn projects_mut(&mut self) -> &mut [Project] {
        &mut self.projects
    }

    pub fn fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn index_of(&self, project_name: &str) -> Option<usize> {
        self.projects
            .iter()
            .position(|p| p.project_name().eq_ignore_ascii_case(project_name))
    }

    pub fn project(&self, project_name: &str) -> Option<&Project> {
        self.index_of(project_name).map(|idx| &self.projects[idx])
    }

    pub fn compat(&self, project_name: &str) -> CompatOption {
        self.compat_dict
            .get(&project_name.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// One line per project: `Name=<AsteriskBugDirLink flag>`. Participates
    /// in the cache revision, since the flag changes dir-link expansion.
    pub fn asterisk_bug_summary(&self) -> String {
        let mut summary = String::new();
        for name in &self.project_names {
            let flag = self.compat(name).asterisk_bug_dir_link;
            summary.push_str(&format!("{name}={flag}\n"));
        }
        summary
    }

    /// Collects every script path of every project, expanding dir-links.
    /// Returns `(script count, dir-link script count)`.
    pub fn prepare_load(&mut self) -> Result<(usize, usize)> {
        let mut script_count = 0;
        let mut link_count = 0;
        let names = self.project_names.clone();
        for name in names {
            let key = name.to_lowercase();
            let (mut spis, mut dpis) = self
                .get_script_paths(&name)
                .with_context(|| format!("unable to scan project [{name}]"))?;
            let compat = self.compat(&name);
            let (link_spis, link_dpis, logs) =
                self.get_dir_links(&name, compat.asterisk_bug_dir_link)?;
            for log in logs {
                if log.state >= LogState::Error {
                    log::error!("{}", log.message);
                } else {
                    log::warn!("{}", log.message);
                }
                self.pending_logs.push(log);
            }
            link_count += link_spis.len();
            spis.extend(link_spis);
            dpis.extend(link_dpis);
            dedup_parse_infos(&mut spis);
            dedup_parse_infos(&mut dpis);
            script_count += spis.len();
            self.spi_dict.insert(key.clone(), spis);
            self.dpi_dict.insert(key, dpis);
        }
        Ok((script_count, link_count))
    }

    /// Files (`script.project`, `*.script`, `*.link`) plus the directories
    /// containing them, under one project root.
    fn get_script_paths(
        &self,
        project_name: &str,
    ) -> Result<(Vec<ScriptParseInfo>, Vec<ScriptParseInfo>)> {
        let project_dir = self.project_root.join(project_name);
        let mut spis = Vec::new();
        let mut dirs: HashSet<PathBuf> = HashSet::new();

        for entry in WalkDir::new(&project_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_script = path
                .extension()
                .is_some_and(|ext| {
                    ext.eq_ignore_ascii_case(constants::SCRIPT_EXT)
                        || ext.eq_ignore_ascii_case(constants::LINK_EXT)
                });
            let is_main = path
                .file_name()
                .is_some_and(|n| n.eq_ignore_ascii_case(constants::MAIN_SCRIPT_FILENAME));
            if !is_script && !is_main {
                continue;
            }
            let tree_path = path
                .strip_prefix(&self.project_root)
                .unwrap_or(path)
                .to_path_buf();
            spis.push(ScriptParseInfo {
                real_path: path.to_path_buf(),
                tree_path,
                is_dir: false,
                is_dir_link: false,
            });
            // Record the ancestor directories of every matched file.
            let mut cursor = path.parent();
            while let Some(dir) = cursor {
                if dir == project_dir || !dir.starts_with(&project_dir) {
                    break;
                }
                dirs.insert(dir.to_path_buf());
                cursor = dir.parent();
            }
        }

        let dpis = dirs
            .into_iter()
            .map(|dir| {
                let tree_path = dir
                    .strip_prefix(&self.project_root)
                    .unwrap_or(&dir)
                    .to_path_buf();
                ScriptParseInfo {
                    real_path: dir,
                    tree_path,
                    is_dir: true,
                    is_dir_link: false,
                }
            })
            .collect();
        Ok((spis, dpis))
    }

    /// Expands every `folder.project` `[Links]` entry of a project.
    ///
    /// An entry names a directory whose scripts are collected recursively.
    /// A trailing wildcard is ignored (the parent directory is scanned),
    /// except with the compatibility flag on, which reproduces the historic
    /// behavior: every immediate subdirectory of the parent becomes its own
    /// directory link.
    fn get_dir_links(
        &self,
        project_name: &str,
        asterisk_bug: bool,
    ) -> Result<(Vec<ScriptParseInfo>, Vec<ScriptParseInfo>, Vec<LogInfo>)> {
        let project_dir = self.project_root.join(project_name);
        let mut spis = Vec::new();
        let mut dpis = Vec::new();
        let mut logs = Vec::new();

        for entry in WalkDir::new(&project_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file()
                || !entry
                    .file_name()
                    .eq_ignore_ascii_case(constants::DIR_LINK_FILENAME)
            {
                continue;
            }
            let descriptor = entry.path();
            let Some(lines) = ini::parse_raw_section(descriptor, "Links")? else {
                continue;
            };
            let tree_base = descriptor
                .parent()
                .and_then(|p| p.strip_prefix(&self.project_root).ok())
                .unwrap_or(Path::new(""))
                .to_path_buf();

            for line in lines {
                let line = line.trim();
                if line.is_empty() || ini::is_comment(line) {
                    continue;
                }
                let raw = normalize_separators(line);
                let path = if Path::new(&raw).is_absolute() {
                    PathBuf::from(&raw)
                } else {
                    self.base_dir.join(&raw)
                };
                let has_wildcard = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .is_some_and(|n| n.contains('*') || n.contains('?'));
                let dir_path = if has_wildcard {
                    match path.parent() {
                        Some(parent) => parent.to_path_buf(),
                        None => path.clone(),
                    }
                } else {
                    path.clone()
                };
                if !dir_path.is_dir() {
                    logs.push(LogInfo::new(
                        LogState::Error,
                        format!(
                            "unable to find path [{}] for directory link",
                            dir_path.display()
                        ),
                    ));
                    continue;
                }

                let targets: Vec<PathBuf> = if has_wildcard && asterisk_bug {
                    list_subdirs(&dir_path)?
                } else {
                    vec![dir_path]
                };

                for target in targets {
                    collect_dir_link(&target, &tree_base, &mut spis, &mut dpis)?;
                }
            }
        }
        Ok((spis, dpis, logs))
    }

    /// Loads every project: stage-1 parallel script load (cache-first if a
    /// valid cache is supplied), stage-2 link resolution, then tree sort.
    pub fn load(&mut self, cache: Option<&ScriptCache>) -> Vec<LogInfo> {
        let mut logs = std::mem::take(&mut self.pending_logs);

        let pool = cache.and_then(|c| {
            if c.check_cache_revision(&self.base_dir, &self.asterisk_bug_summary()) {
                c.acquire();
                Some(c.load_cache_pool())
            } else {
                log::debug!("cache revision mismatch, loading from source");
                None
            }
        });
        let _release = scopeguard::guard((), |()| {
            if pool.is_some() {
                if let Some(c) = cache {
                    c.release();
                }
            }
        });

        self.projects.clear();
        let names = self.project_names.clone();
        for name in names {
            let key = name.to_lowercase();
            let compat = self.compat(&name);
            let mut project = Project::new(&name, &self.base_dir, compat);
            if let Some(dpis) = self.dpi_dict.get(&key) {
                project.set_dir_entries(dpis.clone());
            }
            let spis = self.spi_dict.get(&key).cloned().unwrap_or_default();
            logs.extend(project.load_scripts(&spis, pool.as_ref()));
            logs.extend(project.load_links(pool.as_ref()));
            if project.is_loaded() {
                project.post_load();
                self.projects.push(project);
            }
        }
        self.projects
            .sort_by(|a, b| a.project_name().to_lowercase().cmp(&b.project_name().to_lowercase()));
        self.fully_loaded = true;
        logs
    }

    /// Writes every loaded script into the cache, revision stamp included.
    pub fn cache_scripts(&self, cache: &ScriptCache) -> Result<(usize, usize), CacheError> {
        cache.save_cache_revision(&self.base_dir, &self.asterisk_bug_summary());
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut unique: Vec<&Script> = Vec::new();
        for project in &self.projects {
            for sc in project.all_scripts() {
                if sc.script_type() == ScriptType::Directory {
                    continue;
                }
                if seen.insert(sc.identity_key()) {
                    unique.push(sc);
                }
            }
        }
        cache.cache_scripts(&unique)
    }
}

fn resolve_link_path(raw: &str, base_dir: &Path) -> PathBuf {
    let normalized = normalize_separators(raw);
    let path = Path::new(&normalized);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn dedup_parse_infos(infos: &mut Vec<ScriptParseInfo>) {
    let mut seen = HashSet::new();
    infos.retain(|spi| seen.insert(spi.dedup_key()));
}

fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

/// Recursively collects scripts under a linked directory. Tree paths are
/// grafted below `tree_base/<dir name>`.
fn collect_dir_link(
    dir: &Path,
    tree_base: &Path,
    spis: &mut Vec<ScriptParseInfo>,
    dpis: &mut Vec<ScriptParseInfo>,
) -> Result<()> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tree_root = tree_base.join(&dir_name);
    dpis.push(ScriptParseInfo {
        real_path: dir.to_path_buf(),
        tree_path: tree_root.clone(),
        is_dir: true,
        is_dir_link: true,
    });

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let tree_path = tree_root.join(rel);
        if entry.file_type().is_dir() {
            dpis.push(ScriptParseInfo {
                real_path: path.to_path_buf(),
                tree_path,
                is_dir: true,
                is_dir_link: true,
            });
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(constants::SCRIPT_EXT))
        {
            spis.push(ScriptParseInfo {
                real_path: path.to_path_buf(),
                tree_path,
                is_dir: false,
                is_dir_link: true,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ScriptCache;
    use tempfile::TempDir;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn script_body(title: &str, level: i32) -> String {
        format!("[Main]\nTitle={title}\nLevel={level}\nSelected=True\n\n[Process]\nEcho,{title}\n")
    }

    /// base/Projects/Test with a main script, two leveled scripts and one
    /// script inside a subdirectory.
    fn basic_base(dir: &TempDir) -> PathBuf {
        let base = dir.path().to_path_buf();
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("script.project"),
            "[Main]\nTitle=Test Project\nLevel=0\n\n[Process]\nEcho,root\n",
        );
        write(&proj.join("b.script"), &script_body("B", 1));
        write(&proj.join("a.script"), &script_body("A", 1));
        write(&proj.join("Apps").join("c.script"), &script_body("C", 2));
        base
    }

    #[test]
    fn test_discovery_and_prepare() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        let (scripts, links) = collection.prepare_load().unwrap();

        // --- Assert ---
        assert_eq!(collection.project_names(), ["Test".to_string()]);
        assert_eq!(scripts, 4); // main + a + b + c
        assert_eq!(links, 0);
    }

    #[test]
    fn test_tree_order_is_deterministic() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);

        let order = |base: &Path| -> Vec<String> {
            let mut collection = ProjectCollection::new(base).unwrap();
            collection.prepare_load().unwrap();
            let logs = collection.load(None);
            assert!(
                logs.iter().all(|l| l.state < LogState::Error),
                "{logs:?}"
            );
            collection.projects()[0]
                .all_scripts()
                .iter()
                .map(|sc| sc.tree_path().to_string_lossy().into_owned())
                .collect()
        };

        // --- Execute ---
        let first = order(&base);
        let second = order(&base);

        // --- Assert: stable, main first, scripts before the directory ---
        assert_eq!(first, second);
        assert_eq!(first.len(), 5); // main, a, b, Apps dir, c
        assert!(first[0].ends_with("script.project"));
        assert!(first[1].ends_with("a.script"));
        assert!(first[2].ends_with("b.script"));
        assert!(first[3].ends_with("Apps"));
        assert!(first[4].ends_with("c.script"));
    }

    #[test]
    fn test_runtime_insert_does_not_duplicate_directories() {
        // --- Setup: a loaded tree that already has an Apps directory node ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);
        let extra = base.join("extra.script");
        fs::write(&extra, script_body("Extra", 1)).unwrap();

        // --- Execute: runtime insertion forces a re-sort ---
        let project = &mut collection.projects_mut()[0];
        project
            .load_script_runtime(
                &extra,
                Path::new("Test/extra.script"),
                &LoadScriptRuntimeOptions {
                    add_to_project_tree: true,
                    ..Default::default()
                },
            )
            .unwrap();

        // --- Assert: one directory node per tree path ---
        let apps_nodes = project
            .all_scripts()
            .iter()
            .filter(|sc| {
                sc.script_type() == ScriptType::Directory
                    && path_eq_ignore_case(sc.tree_path(), Path::new("Test/Apps"))
            })
            .count();
        assert_eq!(apps_nodes, 1);
        assert!(project.contains_script_by_tree_path(Path::new("Test/extra.script")));
        assert!(project.contains_script_by_tree_path(Path::new("Test/Apps/c.script")));
    }

    #[test]
    fn test_mixed_level_siblings_sort_deterministically() {
        // --- Setup: two scripts in one directory declaring different levels ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let proj = base.join("Projects").join("Test");
        write(&proj.join("Apps").join("x.script"), &script_body("X", 1));
        write(&proj.join("Apps").join("y.script"), &script_body("Y", 2));

        let order = |base: &Path| -> Vec<(String, i32)> {
            let mut collection = ProjectCollection::new(base).unwrap();
            collection.prepare_load().unwrap();
            collection.load(None);
            collection.projects()[0]
                .all_scripts()
                .iter()
                .map(|sc| (sc.tree_path().to_string_lossy().into_owned(), sc.level()))
                .collect()
        };

        // --- Execute ---
        let first = order(&base);
        let second = order(&base);

        // --- Assert: one Apps node per level, stable across loads ---
        assert_eq!(first, second);
        let apps: Vec<i32> = first
            .iter()
            .filter(|(path, _)| path.ends_with("Apps"))
            .map(|&(_, level)| level)
            .collect();
        assert_eq!(apps, [1, 2]);
        let x_pos = first.iter().position(|(p, _)| p.ends_with("x.script")).unwrap();
        let y_pos = first.iter().position(|(p, _)| p.ends_with("y.script")).unwrap();
        assert!(x_pos < y_pos);
    }

    #[test]
    fn test_link_chain_collapses_to_one_depth() {
        // --- Setup: a.link -> b.link -> c.script ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let proj = base.join("Projects").join("Test");
        write(&proj.join("target.script"), &script_body("Target", 1));
        write(
            &proj.join("middle.link"),
            "[Main]\nLink=Projects/Test/target.script\n",
        );
        write(
            &proj.join("head.link"),
            "[Main]\nLink=Projects/Test/middle.link\n",
        );

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        let logs = collection.load(None);
        assert!(logs.iter().all(|l| l.state < LogState::Error), "{logs:?}");

        // --- Assert ---
        let project = &collection.projects()[0];
        let head = project
            .get_script_by_real_path(&proj.join("head.link"))
            .unwrap();
        assert!(head.link_loaded());
        let target = head.link_target().unwrap();
        assert_eq!(target.script_type(), ScriptType::Script);
        assert!(path_eq_ignore_case(
            target.real_path(),
            &proj.join("target.script")
        ));
        // Link-aware accessors surface the target's metadata.
        assert_eq!(head.title(), "Target");
    }

    #[test]
    fn test_missing_link_target_is_removed_with_error() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("broken.link"),
            "[Main]\nLink=Projects/Test/gone.script\n",
        );

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        let logs = collection.load(None);

        // --- Assert ---
        assert!(logs
            .iter()
            .any(|l| l.state == LogState::Error && l.message.contains("broken.link")));
        let project = &collection.projects()[0];
        assert!(!project.contains_script_by_real_path(&proj.join("broken.link")));
    }

    #[test]
    fn test_link_cycle_terminates_with_error() {
        // --- Setup: two links pointing at each other ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("x.link"),
            "[Main]\nLink=Projects/Test/y.link\n",
        );
        write(
            &proj.join("y.link"),
            "[Main]\nLink=Projects/Test/x.link\n",
        );

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        let logs = collection.load(None);

        // --- Assert: both removed, errors reported, no hang ---
        assert!(logs.iter().filter(|l| l.state == LogState::Error).count() >= 2);
        let project = &collection.projects()[0];
        assert!(!project.contains_script_by_real_path(&proj.join("x.link")));
        assert!(!project.contains_script_by_real_path(&proj.join("y.link")));
    }

    fn dir_link_base(dir: &TempDir, asterisk_bug: bool) -> PathBuf {
        let base = dir.path().to_path_buf();
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("script.project"),
            "[Main]\nTitle=Test Project\nLevel=0\n",
        );
        if asterisk_bug {
            write(
                &proj.join("compat.ini"),
                "[Compat]\nAsteriskBugDirLink=True\n",
            );
        }
        // Linked content lives outside the project tree.
        let pool = base.join("Pool");
        write(&pool.join("App1").join("one.script"), &script_body("One", 1));
        write(&pool.join("App2").join("two.script"), &script_body("Two", 1));
        write(&pool.join("Misc").join("three.script"), &script_body("Three", 1));
        write(
            &proj.join("Linked").join("folder.project"),
            "[Links]\nPool/App*\n",
        );
        base
    }

    #[test]
    fn test_wildcard_dir_link_scans_named_directory() {
        // --- Setup: flag off, `Pool/App*` collapses to `Pool` itself ---
        init_logs();
        let dir = TempDir::new().unwrap();
        let base = dir_link_base(&dir, false);

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);

        // --- Assert: one dir link rooted at Pool ---
        let project = &collection.projects()[0];
        let one = project
            .get_script_by_tree_path(Path::new("Test/Linked/Pool/App1/one.script"))
            .unwrap();
        assert!(one.is_dir_link());
        assert!(project
            .contains_script_by_tree_path(Path::new("Test/Linked/Pool/Misc/three.script")));
        assert!(!project
            .contains_script_by_tree_path(Path::new("Test/Linked/App1/one.script")));
    }

    #[test]
    fn test_wildcard_dir_link_with_asterisk_bug() {
        // --- Setup: flag on, every subdirectory of Pool is its own link ---
        let dir = TempDir::new().unwrap();
        let base = dir_link_base(&dir, true);

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);

        // --- Assert ---
        let project = &collection.projects()[0];
        assert!(project
            .contains_script_by_tree_path(Path::new("Test/Linked/App1/one.script")));
        assert!(project
            .contains_script_by_tree_path(Path::new("Test/Linked/App2/two.script")));
        assert!(project
            .contains_script_by_tree_path(Path::new("Test/Linked/Misc/three.script")));
        assert!(!project
            .contains_script_by_tree_path(Path::new("Test/Linked/Pool/App1/one.script")));
    }

    #[test]
    fn test_missing_dir_link_path_is_reported_as_error() {
        // --- Setup: the [Links] entry names a directory that does not exist ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("Linked").join("folder.project"),
            "[Links]\nNowhere/Gone\n",
        );

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        let logs = collection.load(None);

        // --- Assert: surfaced with error severity, load still succeeds ---
        assert!(logs
            .iter()
            .any(|l| l.state == LogState::Error && l.message.contains("unable to find path")));
        assert_eq!(collection.projects().len(), 1);
    }

    #[test]
    fn test_cache_assisted_load_matches_source_load() {
        // --- Setup ---
        init_logs();
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let cache_path = base.join(constants::CACHE_FILENAME);

        // --- Execute: cold load, populate cache, warm load ---
        let mut cold = ProjectCollection::new(&base).unwrap();
        cold.prepare_load().unwrap();
        cold.load(None);
        let cache = ScriptCache::new(&cache_path).unwrap();
        let (updated, total) = cold.cache_scripts(&cache).unwrap();
        assert_eq!(updated, total);

        let cache = ScriptCache::new(&cache_path).unwrap();
        let mut warm = ProjectCollection::new(&base).unwrap();
        warm.prepare_load().unwrap();
        let logs = warm.load(Some(&cache));
        assert!(logs.iter().all(|l| l.state < LogState::Error), "{logs:?}");

        // --- Assert ---
        let titles = |c: &ProjectCollection| -> Vec<String> {
            c.projects()[0]
                .all_scripts()
                .iter()
                .map(|sc| sc.title().to_string())
                .collect()
        };
        assert_eq!(titles(&cold), titles(&warm));
    }

    #[test]
    fn test_active_and_visible_scripts() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();
        let proj = base.join("Projects").join("Test");
        write(
            &proj.join("script.project"),
            "[Main]\nTitle=Test Project\nLevel=0\n",
        );
        write(&proj.join("on.script"), &script_body("On", 1));
        write(
            &proj.join("off.script"),
            "[Main]\nTitle=Off\nLevel=1\nSelected=False\n\n[Process]\nEcho,off\n",
        );
        write(
            &proj.join("hidden.script"),
            "[Main]\nTitle=Hidden\nLevel=0\nSelected=False\nMandatory=True\n\n[Process]\nEcho,h\n",
        );

        // --- Execute ---
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);
        let project = &collection.projects()[0];

        // --- Assert ---
        let active: Vec<&str> = project.active_scripts().iter().map(|s| s.title()).collect();
        assert!(active.contains(&"Test Project"));
        assert!(active.contains(&"On"));
        assert!(active.contains(&"Hidden")); // mandatory overrides deselection
        assert!(!active.contains(&"Off"));

        let visible: Vec<&str> = project.visible_scripts().iter().map(|s| s.title()).collect();
        assert!(visible.contains(&"On"));
        assert!(visible.contains(&"Off"));
        assert!(!visible.contains(&"Hidden")); // level 0 stays hidden
    }

    #[test]
    fn test_load_script_runtime_tree_collision() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);
        let other = base.join("outside.script");
        fs::write(&other, script_body("Outside", 1)).unwrap();

        let project = &mut collection.projects_mut()[0];
        let taken_tree = Path::new("Test/a.script");

        // --- Execute & Assert: different source, no overwrite -> error ---
        let err = project
            .load_script_runtime(
                &other,
                taken_tree,
                &LoadScriptRuntimeOptions {
                    add_to_project_tree: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::TreePathCollision(_)));

        // Overwrite requested -> replaced.
        project
            .load_script_runtime(
                &other,
                taken_tree,
                &LoadScriptRuntimeOptions {
                    add_to_project_tree: true,
                    overwrite_to_project_tree: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let replaced = project.get_script_by_tree_path(taken_tree).unwrap();
        assert_eq!(replaced.title(), "Outside");
    }

    #[test]
    fn test_refresh_script_reloads_from_disk() {
        // --- Setup ---
        let dir = TempDir::new().unwrap();
        let base = basic_base(&dir);
        let mut collection = ProjectCollection::new(&base).unwrap();
        collection.prepare_load().unwrap();
        collection.load(None);

        let proj_dir = base.join("Projects").join("Test");
        fs::write(proj_dir.join("a.script"), script_body("Renamed", 1)).unwrap();

        // --- Execute ---
        let project = &mut collection.projects_mut()[0];
        assert!(project.refresh_script(Path::new("Test/a.script")).unwrap());

        // --- Assert ---
        let sc = project
            .get_script_by_tree_path(Path::new("Test/a.script"))
            .unwrap();
        assert_eq!(sc.title(), "Renamed");
    }
}

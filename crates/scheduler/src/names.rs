//! Name index: task name -> every live task registered under it.
//!
//! Names are not unique. Patterns use shell-style globbing, matched
//! case-sensitively against whole names: `*`, `?`, `[abc]`, `[a-z]` and
//! `[!abc]`.

use indexmap::IndexMap;

use crate::task::TaskHandle;

#[derive(Debug, Default)]
pub(crate) struct NameIndex {
    names: IndexMap<String, Vec<TaskHandle>>,
}

impl NameIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, task: &TaskHandle) {
        self.names
            .entry(task.name().to_string())
            .or_default()
            .push(task.clone());
    }

    /// Forget `task`. Returns whether it was registered.
    pub(crate) fn unregister(&mut self, task: &TaskHandle) -> bool {
        let Some(list) = self.names.get_mut(task.name()) else {
            return false;
        };
        let Some(pos) = list.iter().position(|t| t == task) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.names.shift_remove(task.name());
        }
        true
    }

    /// Whether any task, live or awaiting reaping, is registered as `name`.
    pub(crate) fn is_registered(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub(crate) fn contains(&self, task: &TaskHandle) -> bool {
        self.names
            .get(task.name())
            .is_some_and(|list| list.contains(task))
    }

    /// Live tasks registered under exactly `name`.
    pub(crate) fn lookup(&self, name: &str) -> Vec<TaskHandle> {
        self.names
            .get(name)
            .map(|list| list.iter().filter(|t| t.is_alive()).cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered task under `name`, including ones flagged removed
    /// but not yet reaped.
    pub(crate) fn lookup_all(&self, name: &str) -> Vec<TaskHandle> {
        self.names.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn has_live(&self, name: &str) -> bool {
        self.names
            .get(name)
            .is_some_and(|list| list.iter().any(TaskHandle::is_alive))
    }

    /// Registered names matching `pattern`, in first-registration order.
    pub(crate) fn matching_names(&self, pattern: &str) -> Vec<String> {
        self.names
            .keys()
            .filter(|name| glob_match(pattern, name))
            .cloned()
            .collect()
    }

    /// Live tasks whose name matches `pattern`.
    pub(crate) fn lookup_matching(&self, pattern: &str) -> Vec<TaskHandle> {
        self.names
            .iter()
            .filter(|(name, _)| glob_match(pattern, name))
            .flat_map(|(_, list)| list.iter().filter(|t| t.is_alive()).cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.names.values().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.names.clear();
    }
}

/// Shell-style match of `name` against `pattern`.
///
/// An unterminated `[` matches a literal bracket.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = name.chars().collect();
    let (mut pi, mut si) = (0, 0);
    // (pattern index after the last '*', name index it is currently absorbing up to)
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        let advanced = match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi + 1, si));
                pi += 1;
                continue;
            }
            Some('?') => Some(pi + 1),
            Some('[') => match parse_class(&p, pi) {
                Some(class) => class.matches(s[si]).then_some(class.end),
                None => (s[si] == '[').then_some(pi + 1),
            },
            Some(&c) => (c == s[si]).then_some(pi + 1),
            None => None,
        };

        match (advanced, backtrack) {
            (Some(next), _) => {
                pi = next;
                si += 1;
            }
            (None, Some((star_pi, star_si))) => {
                // let the last '*' absorb one more character
                pi = star_pi;
                si = star_si + 1;
                backtrack = Some((star_pi, star_si + 1));
            }
            (None, None) => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

struct CharClass {
    negated: bool,
    ranges: Vec<(char, char)>,
    /// Pattern index just past the closing `]`.
    end: usize,
}

impl CharClass {
    fn matches(&self, c: char) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != self.negated
    }
}

fn parse_class(p: &[char], open: usize) -> Option<CharClass> {
    let mut i = open + 1;
    let negated = p.get(i) == Some(&'!');
    if negated {
        i += 1;
    }
    let first = i;
    let mut ranges = Vec::new();
    loop {
        let c = *p.get(i)?;
        if c == ']' && i > first {
            return Some(CharClass { negated, ranges, end: i + 1 });
        }
        match (p.get(i + 1), p.get(i + 2)) {
            (Some('-'), Some(&hi)) if hi != ']' => {
                ranges.push((c, hi));
                i += 3;
            }
            _ => {
                ranges.push((c, c));
                i += 1;
            }
        }
    }
}

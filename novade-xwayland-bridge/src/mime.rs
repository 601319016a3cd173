//! Translation between X11 selection targets and Wayland mime types.
//!
//! X clients name formats with atoms, some of which predate mime types
//! (`UTF8_STRING`, `TEXT`, `_NETSCAPE_URL`). Wayland clients only speak mime
//! strings. [`MimeMapper`] applies the fixed legacy mappings and interns
//! everything else on demand, caching names in both directions so a busy
//! clipboard does not cost a round trip per request.

use std::collections::HashMap;
use std::sync::Arc;

use crate::atoms::Atoms;
use crate::error::XError;
use crate::x11::{Atom, XConnection};

pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_TEXT_PLAIN_UTF8: &str = "text/plain;charset=utf-8";
pub const MIME_URI_LIST: &str = "text/uri-list";
pub const MIME_X_URI: &str = "text/x-uri";

#[derive(Debug)]
pub struct MimeMapper {
    atoms: Arc<Atoms>,
    by_name: HashMap<String, Atom>,
    by_atom: HashMap<Atom, String>,
}

impl MimeMapper {
    pub fn new(atoms: Arc<Atoms>) -> Self {
        Self {
            atoms,
            by_name: HashMap::new(),
            by_atom: HashMap::new(),
        }
    }

    /// Interns `name` verbatim.
    pub fn intern(&mut self, conn: &dyn XConnection, name: &str) -> Result<Atom, XError> {
        if let Some(atom) = self.by_name.get(name) {
            return Ok(*atom);
        }
        let atom = conn.intern_atom(name)?;
        self.by_name.insert(name.to_string(), atom);
        self.by_atom.insert(atom, name.to_string());
        Ok(atom)
    }

    fn name(&mut self, conn: &dyn XConnection, atom: Atom) -> Result<String, XError> {
        if let Some(name) = self.by_atom.get(&atom) {
            return Ok(name.clone());
        }
        let name = conn.atom_name(atom)?;
        self.by_atom.insert(atom, name.clone());
        self.by_name.insert(name.clone(), atom);
        Ok(name)
    }

    /// The mime types an X target stands for. Protocol targets map to nothing.
    pub fn atom_to_mimes(&mut self, conn: &dyn XConnection, atom: Atom) -> Result<Vec<String>, XError> {
        let atoms = Arc::clone(&self.atoms);
        if atoms.is_meta_target(atom) {
            Ok(Vec::new())
        } else if atom == atoms.utf8_string {
            Ok(vec![MIME_TEXT_PLAIN_UTF8.to_string()])
        } else if atom == atoms.text || atom == atoms.string {
            Ok(vec![MIME_TEXT_PLAIN.to_string()])
        } else if atom == atoms.uri_list || atom == atoms.netscape_url || atom == atoms.moz_url {
            Ok(vec![MIME_URI_LIST.to_string(), MIME_X_URI.to_string()])
        } else {
            Ok(vec![self.name(conn, atom)?])
        }
    }

    /// Mime list for a `TARGETS` reply, in the owner's order and without
    /// duplicates. Each mime remembers the first target that produced it.
    pub fn targets_to_mimes(
        &mut self,
        conn: &dyn XConnection,
        targets: &[Atom],
    ) -> Result<Vec<(String, Atom)>, XError> {
        let mut mimes: Vec<(String, Atom)> = Vec::new();
        for &target in targets {
            for mime in self.atom_to_mimes(conn, target)? {
                if !mimes.iter().any(|(known, _)| *known == mime) {
                    mimes.push((mime, target));
                }
            }
        }
        Ok(mimes)
    }

    /// Every target advertised to X clients for one Wayland mime type.
    pub fn mime_to_targets(&mut self, conn: &dyn XConnection, mime: &str) -> Result<Vec<Atom>, XError> {
        let mut targets = vec![self.intern(conn, mime)?];
        match mime {
            MIME_TEXT_PLAIN_UTF8 => targets.push(self.atoms.utf8_string),
            MIME_TEXT_PLAIN => targets.extend([self.atoms.text, self.atoms.string]),
            MIME_X_URI => targets.push(self.atoms.uri_list),
            _ => {}
        }
        Ok(targets)
    }

    /// Advertised targets for a whole source, deduplicated, in source order.
    pub fn mimes_to_targets(&mut self, conn: &dyn XConnection, mimes: &[String]) -> Result<Vec<Atom>, XError> {
        let mut targets = Vec::new();
        for mime in mimes {
            for target in self.mime_to_targets(conn, mime)? {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }

    /// Picks the offered mime type that satisfies a request for `target`.
    pub fn resolve_target(
        &mut self,
        conn: &dyn XConnection,
        target: Atom,
        offered: &[String],
    ) -> Result<Option<String>, XError> {
        let atoms = Arc::clone(&self.atoms);
        let candidates = if target == atoms.utf8_string {
            vec![MIME_TEXT_PLAIN_UTF8.to_string(), MIME_TEXT_PLAIN.to_string()]
        } else if target == atoms.text || target == atoms.string {
            vec![MIME_TEXT_PLAIN.to_string(), MIME_TEXT_PLAIN_UTF8.to_string()]
        } else {
            self.atom_to_mimes(conn, target)?
        };
        Ok(candidates.into_iter().find(|mime| offered.contains(mime)))
    }
}

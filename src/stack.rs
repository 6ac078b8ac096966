//! A stack of transitive dependency flags across dynamic nesting.
//!
//! The depth is the number of dynamic links; `depth + 1` bits are
//! stored for each transitive flag. Bit `j` of a flag's bitmap says the
//! flag is set at nesting level `j`, with lower bits denoting levels
//! lower in the hierarchy. The dependency `-o [ -p X ]` is represented
//! with the `o` bit at level 1 and the `p` bit at level 0.
//!
//! As a rule, indexes named `i` run over the transitive flags and
//! indexes named `j` over the `depth + 1` levels.

use crate::dep::Dependency;
use crate::error::{Error, Result};
use crate::flags::{flags_format, Flags, C_TRANSITIVE};

/// The maximum depth; one more level would not fit the bit width of
/// [Flags].
const MAX_DEPTH: u32 = Flags::BITS - 2;

fn recursion_limit() -> Error {
    Error::fatal("dynamic dependency recursion limit exceeded")
}

/// Per-level bitmaps of the transitive flags of one dependency chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagStack {
    depth: u32,
    bits: [Flags; C_TRANSITIVE],
}

impl FlagStack {
    /// Depth zero, all flags cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth zero, with the given flags at the single level.
    pub fn from_flags(flags: Flags) -> Self {
        let mut stack = Self::new();
        stack.add_lowest(flags);
        stack
    }

    /// All-zero bitmaps at the given depth.
    pub fn with_depth(depth: u32) -> Result<Self> {
        if depth >= Flags::BITS - 1 {
            return Err(recursion_limit());
        }
        let stack = FlagStack {
            depth,
            bits: Default::default(),
        };
        stack.check();
        Ok(stack)
    }

    /// Initialize from a dependency by walking its dynamic chain,
    /// entering each level's flags at the lowest level and pushing.
    pub fn from_dependency(dep: &Dependency) -> Result<Self> {
        assert!(dep.is_simple_recursively());

        let mut stack = Self::new();
        let mut dep = dep;
        while let Dependency::Dynamic(dynamic) = dep {
            stack.add_lowest(dynamic.flags.flags);
            stack.push()?;
            dep = &dynamic.child;
        }
        stack.add_lowest(dep.flags());
        Ok(stack)
    }

    /// Check the internal consistency of this object.
    fn check(&self) {
        debug_assert!(self.depth + 1 < Flags::BITS);
        for i in 0..C_TRANSITIVE {
            // Only the (depth+1) lowest bits may be set.
            debug_assert_eq!(0, self.bits[i] & !self.level_mask());
        }
    }

    fn level_mask(&self) -> Flags {
        (1 << (self.depth + 1)) - 1
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The flags at level 0, the lowest level in the hierarchy.
    pub fn get_lowest(&self) -> Flags {
        self.check();
        let mut ret = 0;
        for i in 0..C_TRANSITIVE {
            ret |= (self.bits[i] & 1) << i;
        }
        ret
    }

    /// The flags at the highest level.
    pub fn get_highest(&self) -> Flags {
        self.check();
        let mut ret = 0;
        for i in 0..C_TRANSITIVE {
            ret |= ((self.bits[i] >> self.depth) & 1) << i;
        }
        ret
    }

    /// The flags at level `j`.
    pub fn get(&self, j: u32) -> Flags {
        let mut ret = 0;
        for i in 0..C_TRANSITIVE {
            ret |= ((self.bits[i] >> j) & 1) << i;
        }
        ret
    }

    /// The flags of a depth-zero stack.
    pub fn get_one(&self) -> Flags {
        assert_eq!(0, self.depth);
        self.check();
        let mut ret = 0;
        for i in 0..C_TRANSITIVE {
            ret |= self.bits[i] << i;
        }
        ret
    }

    /// OR in another stack of the same depth.
    pub fn add(&mut self, other: &FlagStack) {
        self.check();
        assert_eq!(self.depth, other.depth);
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= other.bits[i];
        }
    }

    /// OR in the negation of another stack of the same depth.
    pub fn add_neg(&mut self, other: &FlagStack) {
        self.check();
        assert_eq!(self.depth, other.depth);
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= self.level_mask() ^ other.bits[i];
        }
        self.check();
    }

    /// Set the given flags at level 0.
    pub fn add_lowest(&mut self, flags: Flags) {
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= (flags >> i) & 1;
        }
    }

    /// Set the given flags at the highest level.
    pub fn add_highest(&mut self, flags: Flags) {
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= ((flags >> i) & 1) << self.depth;
        }
    }

    /// Clear the given flags at the highest level.
    pub fn rem_highest(&mut self, flags: Flags) {
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] &= !(((flags >> i) & 1) << self.depth);
        }
    }

    /// Set the negation of the given flags at the highest level.
    pub fn add_highest_neg(&mut self, flags: Flags) {
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= (((flags >> i) & 1) ^ 1) << self.depth;
        }
    }

    /// OR in the negation of the given flags; the depth must be zero.
    pub fn add_one_neg(&mut self, flags: Flags) {
        assert_eq!(0, self.depth);
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= ((flags >> i) & 1) ^ 1;
        }
    }

    /// OR in the negation of another depth-zero stack; the depth must
    /// be zero.
    pub fn add_one_neg_stack(&mut self, other: &FlagStack) {
        assert_eq!(0, self.depth);
        assert_eq!(0, other.depth);
        self.check();
        for i in 0..C_TRANSITIVE {
            self.bits[i] |= other.bits[i] ^ 1;
        }
    }

    /// Add a lowest level, shifting all existing levels up.
    pub fn push(&mut self) -> Result<()> {
        assert!(self.depth < Flags::BITS);
        if self.depth == MAX_DEPTH {
            return Err(recursion_limit());
        }
        self.depth += 1;
        for i in 0..C_TRANSITIVE {
            self.bits[i] <<= 1;
        }
        Ok(())
    }

    /// Remove the lowest level.
    pub fn pop(&mut self) {
        assert!(self.depth > 0);
        self.depth -= 1;
        for i in 0..C_TRANSITIVE {
            self.bits[i] >>= 1;
        }
    }

    /// Render the per-level flags, highest level first, e.g.
    /// `{-o ,-p }`.
    pub fn format(&self) -> String {
        let mut ret = String::new();
        for j in (0..=self.depth).rev() {
            ret.push_str(&flags_format(self.get(j)));
            if j > 0 {
                ret.push(',');
            }
        }
        format!("{{{}}}", ret)
    }
}

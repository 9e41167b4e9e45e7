//! Links between fragments of the same object in different bricks.
//!
//! Fragments are referred to by their record index in `ComponentTable`. Which fragments form one
//! object is a connected-components question only, so the links are kept in a disjoint set
//! instead of an explicit graph.

#[derive(Debug, Default)]
pub struct ComponentSet {
    /// For every node the number of its component.
    pub component_assignment: Vec<u32>,
    /// Nodes of every component in ascending order.
    pub members: Vec<Vec<u32>>,
}

#[derive(Debug, Default)]
pub struct DisjointSet {
    parents: Vec<u32>,
    sizes: Vec<u32>,
}

impl DisjointSet {
    pub fn new(size: u32) -> Self {
        assert!(size < u32::MAX, "Size must be smaller than {}", u32::MAX);
        DisjointSet {
            parents: (0..size).collect(),
            sizes: vec![1; size as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Adds singleton nodes up to `size`.
    pub fn grow(&mut self, size: u32) {
        let len = self.parents.len() as u32;
        if size > len {
            self.parents.extend(len..size);
            self.sizes.resize(size as usize, 1);
        }
    }

    #[inline]
    pub fn find(&mut self, node: u32) -> u32 {
        let mut x = node as usize;
        while self.parents[x] as usize != x {
            // path halving
            let grandparent = self.parents[self.parents[x] as usize];
            self.parents[x] = grandparent;
            x = grandparent as usize;
        }
        x as u32
    }

    /// Joins the sets of `node_i` and `node_j`, the smaller set is attached to the larger one.
    /// Returns false if they were already joined.
    #[inline]
    pub fn merge(&mut self, node_i: u32, node_j: u32) -> bool {
        let mut root_x = self.find(node_i);
        let mut root_y = self.find(node_j);
        if root_x == root_y {
            return false;
        }
        if self.sizes[root_x as usize] < self.sizes[root_y as usize] {
            std::mem::swap(&mut root_x, &mut root_y);
        }
        self.parents[root_y as usize] = root_x;
        self.sizes[root_x as usize] += self.sizes[root_y as usize];
        true
    }

    /// Numbers the sets in the order of their smallest node and lists their members.
    pub fn flatten(&mut self) -> ComponentSet {
        let len = self.parents.len() as u32;
        let mut component_of_root = vec![u32::MAX; len as usize];
        let mut result = ComponentSet {
            component_assignment: Vec::with_capacity(len as usize),
            members: vec![],
        };
        for node in 0..len {
            let root = self.find(node) as usize;
            if component_of_root[root] == u32::MAX {
                component_of_root[root] = result.members.len() as u32;
                result.members.push(vec![]);
            }
            let component = component_of_root[root];
            result.component_assignment.push(component);
            result.members[component as usize].push(node);
        }
        result
    }
}

/// Which record fragments belong to the same object.
///
/// A record becomes a vertex on its first link. Traversal passes mark vertices visited, so every
/// object is reported once per pass; call [`LinkGraph::clear_visited`] before each pass.
#[derive(Debug, Default)]
pub struct LinkGraph {
    set: DisjointSet,
    is_vertex: Vec<bool>,
    num_vertices: usize,
    visited: Vec<bool>,
    components: Option<ComponentSet>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Links the fragments with record indices `a` and `b`.
    pub fn link_comps(&mut self, a: u32, b: u32) {
        let needed = a.max(b) + 1;
        if needed as usize > self.is_vertex.len() {
            self.set.grow(needed);
            self.is_vertex.resize(needed as usize, false);
            self.visited.resize(needed as usize, false);
            self.components = None;
        }
        for v in [a, b] {
            if !self.is_vertex[v as usize] {
                self.is_vertex[v as usize] = true;
                self.num_vertices += 1;
            }
        }
        if self.set.merge(a, b) {
            self.components = None;
        }
    }

    pub fn clear_visited(&mut self) {
        self.visited.fill(false);
    }

    #[inline]
    pub fn is_vertex(&self, index: u32) -> bool {
        self.is_vertex.get(index as usize).copied().unwrap_or(false)
    }

    #[inline]
    pub fn visited(&self, index: u32) -> bool {
        self.visited.get(index as usize).copied().unwrap_or(false)
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    /// Vertices in ascending order.
    pub fn vertices(&self) -> impl Iterator<Item = u32> + '_ {
        (0u32..)
            .zip(&self.is_vertex)
            .filter(|(_, v)| **v)
            .map(|(i, _)| i)
    }

    /// Number of connected sets of vertices.
    pub fn num_sets(&mut self) -> usize {
        self.components();
        let Some(components) = &self.components else {
            return 0;
        };
        let mut seen = vec![false; components.members.len()];
        let mut count = 0;
        for (index, is_vertex) in self.is_vertex.iter().enumerate() {
            if !is_vertex {
                continue;
            }
            let component = components.component_assignment[index] as usize;
            if !seen[component] {
                seen[component] = true;
                count += 1;
            }
        }
        count
    }

    /// Appends every unvisited vertex linked to `start` (including `start`) to `out` in ascending
    /// order and marks them visited.
    ///
    /// Returns false if `start` is not a vertex or was already visited in this pass, true if the
    /// object spans more than one fragment.
    pub fn linked_comps(&mut self, start: u32, out: &mut Vec<u32>) -> bool {
        if !self.is_vertex(start) || self.visited(start) {
            return false;
        }
        self.components();
        let Some(components) = &self.components else {
            return false;
        };
        let component = components.component_assignment[start as usize] as usize;
        let before = out.len();
        for &member in &components.members[component] {
            if !self.visited[member as usize] {
                self.visited[member as usize] = true;
                out.push(member);
            }
        }
        out.len() - before > 1
    }

    fn components(&mut self) -> &ComponentSet {
        if self.components.is_none() {
            self.components = Some(self.set.flatten());
        }
        self.components.get_or_insert_with(ComponentSet::default)
    }
}

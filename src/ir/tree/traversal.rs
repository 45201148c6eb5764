//! Depth-first walks that remember the level of every node.

pub const CANDIDATE_CAPACITY: usize = 32;

/// Pair of (level of the node in the walk, node).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LevelNode<T>(pub usize, pub T)
where
    T: Copy;

/// Children before their parent: the order operands have to be emitted in.
pub struct PostOrder<F, I, T>
where
    F: FnMut(T) -> I,
    I: Iterator<Item = T>,
    T: Copy,
{
    iter_children: F,
    nodes: Vec<LevelNode<T>>,
}

impl<F, I, T> PostOrder<F, I, T>
where
    F: FnMut(T) -> I,
    I: Iterator<Item = T>,
    T: Copy,
{
    pub fn with_capacity(iter_children: F, capacity: usize) -> Self {
        Self {
            iter_children,
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub fn populate_nodes(mut self, root: T) -> Vec<LevelNode<T>> {
        self.nodes.clear();
        self.traverse(root, 0);
        self.nodes
    }

    fn traverse(&mut self, root: T, level: usize) {
        for child in (self.iter_children)(root) {
            self.traverse(child, level + 1);
        }
        self.nodes.push(LevelNode(level, root));
    }
}

/// Parent before its children, children in their own order. Used to print
/// trees top-down.
pub struct PreOrder<F, I, T>
where
    F: FnMut(T) -> I,
    I: Iterator<Item = T>,
    T: Copy,
{
    iter_children: F,
    nodes: Vec<LevelNode<T>>,
}

impl<F, I, T> PreOrder<F, I, T>
where
    F: FnMut(T) -> I,
    I: Iterator<Item = T>,
    T: Copy,
{
    pub fn with_capacity(iter_children: F, capacity: usize) -> Self {
        Self {
            iter_children,
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub fn populate_nodes(mut self, root: T) -> Vec<LevelNode<T>> {
        self.nodes.clear();
        let mut stack = vec![LevelNode(0, root)];
        while let Some(LevelNode(level, node)) = stack.pop() {
            self.nodes.push(LevelNode(level, node));
            let children = (self.iter_children)(node).collect::<Vec<_>>();
            stack.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| LevelNode(level + 1, child)),
            );
        }
        self.nodes
    }
}

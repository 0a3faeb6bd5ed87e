//! 3D 形态学操作.

use ndarray::Array3;

use crate::consts::label::{self, is_background};
use crate::{Idx3d, MaskVolume, VolumeGeometry};

/// 填洞实现块
impl MaskVolume {
    /// 将三维掩膜中的背景空洞填充为前景.
    ///
    /// 从长方体六个表面上的背景体素出发, 按钻石 (6-) 连通进行漫水填充;
    /// 无法从表面到达的背景体素即为空洞, 被改写为 [`label::FOREGROUND`].
    ///
    /// 该操作是幂等的: 填充后的掩膜不再含有任何空洞.
    ///
    /// # 返回值
    ///
    /// 被填充的体素个数.
    pub fn fill_holes(&mut self) -> usize {
        if self.size() == 0 {
            return 0;
        }
        let reached = self.reachable_background();
        let mut filled = 0usize;
        self.data_mut()
            .iter_mut()
            .zip(reached.iter())
            .filter(|(p, r)| is_background(**p) && !**r)
            .for_each(|(p, _)| {
                filled += 1;
                *p = label::FOREGROUND;
            });
        filled
    }

    /// 标记所有能从六个表面经背景体素到达的背景体素.
    fn reachable_background(&self) -> Array3<bool> {
        let shape = self.shape();
        let mut reached = Array3::from_elem(shape, false);
        let mut stack: Vec<Idx3d> = Vec::with_capacity(1024);

        for pos in surface_positions(shape) {
            if is_background(self[pos]) && !reached[pos] {
                reached[pos] = true;
                stack.push(pos);
            }
        }

        while let Some(pos) = stack.pop() {
            for neigh in self.diamond_neighbours(pos) {
                if !reached[neigh] && is_background(self[neigh]) {
                    reached[neigh] = true;
                    stack.push(neigh);
                }
            }
        }
        reached
    }
}

/// 长方体六个表面上的全部索引 (可能有重复).
fn surface_positions((z, h, w): Idx3d) -> impl Iterator<Item = Idx3d> {
    let z_faces = [0, z.saturating_sub(1)].into_iter().flat_map(move |zi| {
        (0..h).flat_map(move |hi| (0..w).map(move |wi| (zi, hi, wi)))
    });
    let h_faces = [0, h.saturating_sub(1)].into_iter().flat_map(move |hi| {
        (0..z).flat_map(move |zi| (0..w).map(move |wi| (zi, hi, wi)))
    });
    let w_faces = [0, w.saturating_sub(1)].into_iter().flat_map(move |wi| {
        (0..z).flat_map(move |zi| (0..h).map(move |hi| (zi, hi, wi)))
    });
    z_faces.chain(h_faces).chain(w_faces)
}

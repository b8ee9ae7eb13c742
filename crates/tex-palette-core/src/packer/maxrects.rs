use super::Rect;

/// MaxRects free-list packer (best-area-fit) for one palette page.
///
/// Rectangles already laid out in a previous run are registered with [`MaxRectsPacker::occupy`]
/// before new ones are inserted, so existing layouts never move.
pub struct MaxRectsPacker {
    bounds: Rect,
    free: Vec<Rect>,
    used: Vec<Rect>,
}

impl MaxRectsPacker {
    pub fn new(width: u32, height: u32) -> Self {
        let bounds = Rect::new(0, 0, width, height);
        Self {
            bounds,
            free: vec![bounds],
            used: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Marks `rect` as taken without searching for a position.
    pub fn occupy(&mut self, rect: Rect) {
        if rect.w == 0 || rect.h == 0 {
            return;
        }
        self.place_rect(&rect);
    }

    /// Returns true if a `w x h` rectangle would fit somewhere on the page.
    pub fn can_fit(&self, w: u32, h: u32) -> bool {
        self.find_position(w, h).is_some()
    }

    /// Places a `w x h` rectangle and returns where it went.
    pub fn insert(&mut self, w: u32, h: u32) -> Option<Rect> {
        let place = self.find_position(w, h)?;
        self.place_rect(&place);
        Some(place)
    }

    /// Rectangles placed or occupied so far, in placement order.
    pub fn used(&self) -> &[Rect] {
        &self.used
    }

    pub fn free_list_len(&self) -> usize {
        self.free.len()
    }

    fn place_rect(&mut self, node: &Rect) {
        // split all free rectangles that intersect with node
        let mut new_free: Vec<Rect> = Vec::with_capacity(self.free.len() + 4);
        for fr in self.free.iter() {
            if !fr.intersects(node) {
                new_free.push(*fr);
                continue;
            }
            let ix1 = fr.x.max(node.x);
            let iy1 = fr.y.max(node.y);
            let ix2 = fr.right().min(node.right());
            let iy2 = fr.bottom().min(node.bottom());

            // above
            if iy1 > fr.y {
                new_free.push(Rect::new(fr.x, fr.y, fr.w, iy1 - fr.y));
            }
            // below
            if iy2 < fr.bottom() {
                new_free.push(Rect::new(fr.x, iy2, fr.w, fr.bottom() - iy2));
            }
            // left
            if ix1 > fr.x {
                new_free.push(Rect::new(fr.x, fr.y, ix1 - fr.x, fr.h));
            }
            // right
            if ix2 < fr.right() {
                new_free.push(Rect::new(ix2, fr.y, fr.right() - ix2, fr.h));
            }
        }
        self.free = new_free;
        self.prune_free_list();
        self.used.push(*node);
    }

    fn prune_free_list(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let a = self.free[i];
            let mut remove_i = false;
            let mut j = i + 1;
            while j < self.free.len() {
                let b = self.free[j];
                if b.contains(&a) {
                    remove_i = true;
                    break;
                }
                if a.contains(&b) {
                    self.free.remove(j);
                    continue;
                }
                j += 1;
            }
            if remove_i {
                self.free.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn find_position(&self, w: u32, h: u32) -> Option<Rect> {
        if w == 0 || h == 0 {
            return None;
        }
        let mut best: Option<(u64, u32, u32, u32, Rect)> = None;
        for fr in &self.free {
            if fr.w < w || fr.h < h {
                continue;
            }
            // perfect fit early-out
            if fr.w == w && fr.h == h {
                return Some(Rect::new(fr.x, fr.y, w, h));
            }
            let area_fit = fr.area() - (w as u64 * h as u64);
            let short_fit = (fr.w - w).min(fr.h - h);
            // tie-break: smaller short-side leftover, then top-most, then left-most
            let key = (area_fit, short_fit, fr.y, fr.x);
            let better = match &best {
                None => true,
                Some((ba, bs, by, bx, _)) => key < (*ba, *bs, *by, *bx),
            };
            if better {
                best = Some((area_fit, short_fit, fr.y, fr.x, Rect::new(fr.x, fr.y, w, h)));
            }
        }
        best.map(|b| b.4)
    }
}

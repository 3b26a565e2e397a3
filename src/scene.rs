//! Orbiting bodies and a flat software rasterizer that turns them into RGB24
//! frames.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Circular orbit around a parent body, angles in degrees.
#[derive(Debug, Clone, Copy)]
pub struct Orbit {
    pub parent: usize,
    pub distance: f32,
    /// Degrees per second.
    pub speed: f32,
    /// Inclination of the orbital plane.
    pub tilt: f32,
    pub angle: f32,
}

impl Orbit {
    pub fn new(parent: usize, distance: f32, speed: f32, tilt: f32) -> Self {
        Self {
            parent,
            distance,
            speed,
            tilt,
            angle: 0.0,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        self.angle += self.speed * dt;
        if self.angle > 360.0 {
            self.angle -= 360.0;
        }
    }

    pub fn position(&self, parent: Vec3) -> Vec3 {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let x = parent.x + self.distance * cos;
        let z = parent.z + self.distance * sin;
        let y = if self.tilt != 0.0 {
            parent.y + self.distance * sin * self.tilt.to_radians().sin()
        } else {
            parent.y
        };
        Vec3::new(x, y, z)
    }
}

#[derive(Debug, Clone)]
pub struct Body {
    pub name: &'static str,
    pub radius: f32,
    pub color: [u8; 3],
    pub position: Vec3,
    pub orbit: Option<Orbit>,
}

impl Body {
    pub fn fixed(name: &'static str, radius: f32, color: [u8; 3]) -> Self {
        Self {
            name,
            radius,
            color,
            position: Vec3::default(),
            orbit: None,
        }
    }

    pub fn orbiting(name: &'static str, radius: f32, color: [u8; 3], orbit: Orbit) -> Self {
        Self {
            name,
            radius,
            color,
            position: Vec3::default(),
            orbit: Some(orbit),
        }
    }
}

/// Bodies ordered so every parent precedes its satellites.
pub struct Scene {
    bodies: Vec<Body>,
    paused: bool,
    background: [u8; 3],
}

impl Scene {
    pub fn new(bodies: Vec<Body>) -> anyhow::Result<Self> {
        for (i, body) in bodies.iter().enumerate() {
            if let Some(orbit) = body.orbit {
                if orbit.parent >= i {
                    anyhow::bail!(
                        "{} orbits body {} which is not declared before it",
                        body.name,
                        orbit.parent
                    );
                }
            }
        }
        let mut scene = Self {
            bodies,
            paused: false,
            background: [6, 8, 20],
        };
        scene.place();
        Ok(scene)
    }

    pub fn solar_system() -> anyhow::Result<Self> {
        Self::new(vec![
            Body::fixed("sun", 1.6, [255, 200, 60]),
            Body::orbiting("earth", 0.6, [60, 120, 230], Orbit::new(0, 5.0, 20.0, 0.0)),
            Body::orbiting("moon", 0.25, [200, 200, 200], Orbit::new(1, 1.4, 90.0, 10.0)),
        ])
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn update(&mut self, dt: f32) {
        if self.paused {
            return;
        }
        for body in &mut self.bodies {
            if let Some(orbit) = body.orbit.as_mut() {
                orbit.advance(dt);
            }
        }
        self.place();
    }

    fn place(&mut self) {
        for i in 0..self.bodies.len() {
            if let Some(orbit) = self.bodies[i].orbit {
                let parent = self.bodies[orbit.parent].position;
                self.bodies[i].position = orbit.position(parent);
            }
        }
    }

    /// Rasterizes the scene into `buf` (RGB24, stride 3 * width). The camera
    /// looks down at the orbital plane from an angle; farther bodies are
    /// drawn first.
    pub fn render(&self, buf: &mut [u8], width: u32, height: u32) {
        let (w, h) = (width as usize, height as usize);
        for px in buf.chunks_exact_mut(3) {
            px.copy_from_slice(&self.background);
        }

        let scale = w.min(h) as f32 / 16.0;
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let mut order: Vec<&Body> = self.bodies.iter().collect();
        order.sort_by(|a, b| a.position.z.total_cmp(&b.position.z));

        for body in order {
            let sx = cx + body.position.x * scale;
            let sy = cy + (body.position.z * 0.45 - body.position.y) * scale;
            let r = body.radius * scale;
            let x0 = (sx - r).floor().max(0.0) as usize;
            let x1 = ((sx + r).ceil().max(0.0) as usize).min(w);
            let y0 = (sy - r).floor().max(0.0) as usize;
            let y1 = ((sy + r).ceil().max(0.0) as usize).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    let dx = x as f32 + 0.5 - sx;
                    let dy = y as f32 + 0.5 - sy;
                    let d2 = dx * dx + dy * dy;
                    if d2 > r * r {
                        continue;
                    }
                    // cheap limb darkening
                    let shade = 1.0 - 0.45 * (d2 / (r * r));
                    let i = (y * w + x) * 3;
                    for c in 0..3 {
                        buf[i + c] = (body.color[c] as f32 * shade) as u8;
                    }
                }
            }
        }
    }
}
